/// Match `key` against a glob where `*` stands for any run of characters.
/// A pattern without `*` must equal the key.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0, 0);
    let mut star: Option<usize> = None;
    let mut resume = 0;

    while ki < k.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ki;
            pi += 1;
        } else if pi < p.len() && p[pi] == k[ki] {
            pi += 1;
            ki += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ki = resume;
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
