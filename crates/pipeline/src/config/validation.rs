use super::types::PipelineConfig;
use crate::error::PipelineError;

impl PipelineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.dispatch.validate()?;
        self.cache.validate()?;
        self.broadcast.validate()?;
        self.validate_settings()?;
        Ok(())
    }

    fn validate_settings(&self) -> Result<(), PipelineError> {
        let p = &self.pipeline;
        if p.update_ttl_ms == 0 || p.result_cache_ttl_ms == 0 {
            return Err(PipelineError::Config(
                "pipeline.update_ttl_ms and result_cache_ttl_ms must be non-zero".into(),
            ));
        }
        if p.stats_interval_ms == 0 {
            return Err(PipelineError::Config("pipeline.stats_interval_ms must be non-zero".into()));
        }
        if p.history_capacity == 0 {
            return Err(PipelineError::Config("pipeline.history_capacity must be at least 1".into()));
        }
        if p.invalidation_priority > undertow_core::MAX_PRIORITY {
            return Err(PipelineError::Config(format!(
                "pipeline.invalidation_priority must be at most {}",
                undertow_core::MAX_PRIORITY
            )));
        }
        Ok(())
    }
}
