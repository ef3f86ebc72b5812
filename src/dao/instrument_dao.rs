use chrono::NaiveDate;

use crate::core::AppError;
use crate::db::Db;

#[derive(Debug, Clone)]
pub struct InstrumentUpsert {
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

/// Replace the full active instrument set inside one transaction. A full
/// delete-then-reinsert keeps the table free of instruments the master list
/// no longer carries (expired contracts, delisted symbols) without
/// requiring a separate "mark inactive" pass.
pub async fn replace_all_instruments(db: &Db, instruments: &[InstrumentUpsert]) -> Result<u64, AppError> {
    let client = db.client();
    client.batch_execute("BEGIN").await?;

    let result: Result<u64, AppError> = async {
        client.execute("DELETE FROM instruments", &[]).await?;

        let stmt = client
            .prepare(
                "INSERT INTO instruments (
                    instrument_token, security_id, trading_symbol, exchange, segment,
                    instrument_type, expiry, strike, tick_size, lot_size, source, is_active
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, true)
                ON CONFLICT (instrument_token) DO UPDATE SET
                    security_id      = EXCLUDED.security_id,
                    trading_symbol   = EXCLUDED.trading_symbol,
                    exchange         = EXCLUDED.exchange,
                    segment          = EXCLUDED.segment,
                    instrument_type  = EXCLUDED.instrument_type,
                    expiry           = EXCLUDED.expiry,
                    strike           = EXCLUDED.strike,
                    tick_size        = EXCLUDED.tick_size,
                    lot_size         = EXCLUDED.lot_size,
                    source           = EXCLUDED.source,
                    is_active        = true",
            )
            .await?;

        let mut n: u64 = 0;
        for i in instruments {
            n += client
                .execute(
                    &stmt,
                    &[
                        &i.instrument_token,
                        &i.security_id,
                        &i.trading_symbol,
                        &i.exchange,
                        &i.segment,
                        &i.instrument_type,
                        &i.expiry,
                        &i.strike,
                        &i.tick_size,
                        &i.lot_size,
                        &i.source,
                    ],
                )
                .await?;
        }

        Ok(n)
    }
    .await;

    match result {
        Ok(n) => {
            client.batch_execute("COMMIT").await?;
            Ok(n)
        }
        Err(e) => {
            let _ = client.batch_execute("ROLLBACK").await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_row_carries_all_required_fields() {
        let row = InstrumentUpsert {
            instrument_token: 1,
            security_id: Some("49229".into()),
            trading_symbol: "NIFTY24JULFUT".into(),
            exchange: "NSE".into(),
            segment: "NSE_FNO".into(),
            instrument_type: "FUT".into(),
            expiry: NaiveDate::from_ymd_opt(2026, 7, 31),
            strike: None,
            tick_size: 0.05,
            lot_size: 25,
            source: "dhan".into(),
        };
        assert_eq!(row.security_id.as_deref(), Some("49229"));
        assert_eq!(row.lot_size, 25);
    }
}
