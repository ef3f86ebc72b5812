use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::Cache;
use crate::core::AppError;
use crate::db::Db;

const CACHE_KEY: &str = "instrument_cache:snapshot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentMeta {
    pub instrument_token: i32,
    pub security_id: Option<String>,
    pub trading_symbol: String,
    pub exchange: String,
    pub segment: String,
    pub instrument_type: String,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<f64>,
    pub tick_size: f64,
    pub lot_size: i32,
    pub source: String,
}

struct Snapshot {
    by_token: HashMap<i32, InstrumentMeta>,
    by_security_id: HashMap<String, InstrumentMeta>,
}

impl Snapshot {
    fn build(instruments: Vec<InstrumentMeta>) -> Self {
        let mut by_token = HashMap::with_capacity(instruments.len());
        let mut by_security_id = HashMap::with_capacity(instruments.len());
        for inst in instruments {
            if let Some(sid) = &inst.security_id {
                by_security_id.insert(sid.clone(), inst.clone());
            }
            by_token.insert(inst.instrument_token, inst);
        }
        Self {
            by_token,
            by_security_id,
        }
    }
}

/// Lock-free, hot-reloadable instrument directory (§4.1). Readers never
/// block a writer mid-reload: `reload()` builds the replacement map off to
/// the side and swaps the `ArcSwap` pointer atomically, so a lookup always
/// observes either the old snapshot in full or the new one in full, never a
/// partial mix.
pub struct InstrumentCache {
    snapshot: ArcSwap<Snapshot>,
}

impl InstrumentCache {
    /// Load the active instrument set from Postgres. If the query itself
    /// fails (connection down at startup), fall back to the last snapshot
    /// persisted in Redis; if neither source is available the caller should
    /// treat this as a fatal startup error: this crate does not run in a
    /// degraded "no instruments known" mode.
    pub async fn load(db: &Db, cache: &Cache) -> Result<Self, AppError> {
        match Self::load_from_db(db).await {
            Ok(instruments) => {
                let snap = Self {
                    snapshot: ArcSwap::from_pointee(Snapshot::build(instruments.clone())),
                };
                let _ = cache.set_json_with_ttl(CACHE_KEY, &instruments, std::time::Duration::from_secs(7 * 24 * 60 * 60)).await;
                Ok(snap)
            }
            Err(db_err) => {
                tracing::warn!(error = %db_err, "instrument load from db failed, falling back to cache");
                let cached = cache
                    .get(CACHE_KEY)
                    .await?
                    .ok_or_else(|| AppError::Config("no instrument snapshot available (db and cache both empty)".into()))?;
                let instruments: Vec<InstrumentMeta> = serde_json::from_str(&cached)?;
                Ok(Self {
                    snapshot: ArcSwap::from_pointee(Snapshot::build(instruments)),
                })
            }
        }
    }

    async fn load_from_db(db: &Db) -> Result<Vec<InstrumentMeta>, AppError> {
        let rows = db
            .client()
            .query(
                "SELECT instrument_token, security_id, trading_symbol, exchange, segment,
                        instrument_type, expiry, strike, tick_size, lot_size, source
                 FROM instruments
                 WHERE is_active = true",
                &[],
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| InstrumentMeta {
                instrument_token: row.get(0),
                security_id: row.get(1),
                trading_symbol: row.get(2),
                exchange: row.get(3),
                segment: row.get(4),
                instrument_type: row.get(5),
                expiry: row.get(6),
                strike: row.get(7),
                tick_size: row.get(8),
                lot_size: row.get(9),
                source: row.get(10),
            })
            .collect())
    }

    /// Re-read the active instrument set and atomically swap it in. On
    /// failure the old snapshot stays live; a reload never leaves the
    /// cache half-updated.
    pub async fn reload(&self, db: &Db, cache: &Cache) -> Result<usize, AppError> {
        let instruments = Self::load_from_db(db).await?;
        let count = instruments.len();
        let _ = cache
            .set_json_with_ttl(CACHE_KEY, &instruments, std::time::Duration::from_secs(7 * 24 * 60 * 60))
            .await;
        self.snapshot.store(Arc::new(Snapshot::build(instruments)));
        Ok(count)
    }

    pub fn resolve_security_id(&self, security_id: &str) -> Option<InstrumentMeta> {
        self.snapshot.load().by_security_id.get(security_id).cloned()
    }

    pub fn resolve_token(&self, instrument_token: i32) -> Option<InstrumentMeta> {
        self.snapshot.load().by_token.get(&instrument_token).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(exchange_segment, security_id)` pairs, for building a
    /// subscription list. Instruments whose `segment` string doesn't map to
    /// a known `ExchangeSegment` or that carry no `security_id` are skipped,
    /// since they can't be subscribed to on the wire either way.
    pub fn all_refs(&self) -> Vec<(crate::feed::ExchangeSegment, String)> {
        self.snapshot
            .load()
            .by_token
            .values()
            .filter_map(|m| {
                let sid = m.security_id.clone()?;
                let seg = crate::feed::ExchangeSegment::from_wire_str(&m.segment)?;
                Some((seg, sid))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(token: i32, sid: &str) -> InstrumentMeta {
        InstrumentMeta {
            instrument_token: token,
            security_id: Some(sid.to_string()),
            trading_symbol: format!("SYM{token}"),
            exchange: "NSE".into(),
            segment: "NSE_FNO".into(),
            instrument_type: "FUT".into(),
            expiry: None,
            strike: None,
            tick_size: 0.05,
            lot_size: 25,
            source: "dhan".into(),
        }
    }

    #[test]
    fn snapshot_resolves_both_directions() {
        let snap = Snapshot::build(vec![sample(1, "100"), sample(2, "200")]);
        assert_eq!(snap.by_token.get(&1).unwrap().security_id.as_deref(), Some("100"));
        assert_eq!(snap.by_security_id.get("200").unwrap().instrument_token, 2);
    }

    #[test]
    fn snapshot_tolerates_missing_security_id() {
        let mut inst = sample(3, "300");
        inst.security_id = None;
        let snap = Snapshot::build(vec![inst]);
        assert_eq!(snap.by_token.len(), 1);
        assert_eq!(snap.by_security_id.len(), 0);
    }
}
