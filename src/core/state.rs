use std::sync::Arc;

use super::config::AppConfig;
use crate::cache::Cache;
use crate::db::Db;
use crate::instrument_cache::InstrumentCache;

/// Shared, process-wide handles. One lifecycle owner (`main`) constructs
/// these once and passes them by reference/clone into each pipeline stage,
/// no global singletons.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Db>,
    pub cache: Arc<Cache>,
    pub instruments: Arc<InstrumentCache>,
}
