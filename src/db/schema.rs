use crate::core::AppError;
use crate::db::Db;

/// Idempotent DDL bootstrap for the four tables in §6. Gated behind
/// `DB_AUTO_MIGRATE=1`; in most deployments the schema is owned by a
/// separate migration tool, but local/dev runs can self-provision.
///
/// `create_hypertable` / compression / retention policy calls are
/// TimescaleDB extension calls; on a plain Postgres instance they simply
/// fail and are logged, not treated as fatal (the tables themselves are
/// created either way and behave as plain append-only tables).
pub async fn ensure_schema(db: &Db) -> Result<(), AppError> {
    let client = db.client();

    client
        .batch_execute(
            "
            CREATE TABLE IF NOT EXISTS instruments (
                instrument_token  INTEGER PRIMARY KEY,
                security_id       TEXT UNIQUE,
                trading_symbol    TEXT NOT NULL,
                exchange          TEXT NOT NULL,
                segment           TEXT NOT NULL,
                instrument_type   TEXT NOT NULL,
                expiry            DATE,
                strike            DOUBLE PRECISION,
                tick_size         DOUBLE PRECISION NOT NULL,
                lot_size          INTEGER NOT NULL,
                source            TEXT NOT NULL,
                is_active         BOOLEAN NOT NULL DEFAULT true
            );

            CREATE TABLE IF NOT EXISTS ticks (
                time               TIMESTAMPTZ NOT NULL,
                instrument_token   INTEGER NOT NULL,
                last_price         DOUBLE PRECISION,
                avg_traded_price   DOUBLE PRECISION,
                open               DOUBLE PRECISION,
                high               DOUBLE PRECISION,
                low                DOUBLE PRECISION,
                close              DOUBLE PRECISION,
                prev_close         DOUBLE PRECISION,
                last_traded_qty    BIGINT,
                volume_traded      BIGINT,
                total_buy_qty      BIGINT,
                total_sell_qty     BIGINT,
                oi                 BIGINT,
                oi_day_high        BIGINT,
                oi_day_low         BIGINT,
                bid_prices         DOUBLE PRECISION[5],
                bid_qtys           BIGINT[5],
                bid_orders         INTEGER[5],
                ask_prices         DOUBLE PRECISION[5],
                ask_qtys           BIGINT[5],
                ask_orders         INTEGER[5],
                change             DOUBLE PRECISION,
                change_pct         DOUBLE PRECISION,
                spread             DOUBLE PRECISION,
                mid                DOUBLE PRECISION,
                order_imbalance    BIGINT,
                PRIMARY KEY (time, instrument_token)
            );

            CREATE TABLE IF NOT EXISTS depth_levels_200 (
                time         TIMESTAMPTZ NOT NULL,
                security_id  TEXT NOT NULL,
                side         TEXT NOT NULL,
                level_num    INTEGER NOT NULL,
                price        DOUBLE PRECISION NOT NULL,
                quantity     BIGINT NOT NULL,
                order_count  INTEGER NOT NULL,
                PRIMARY KEY (time, security_id, side, level_num)
            );

            CREATE TABLE IF NOT EXISTS depth_signals (
                time           TIMESTAMPTZ NOT NULL,
                security_id    TEXT NOT NULL,
                current_price  DOUBLE PRECISION NOT NULL,
                key_levels     JSONB NOT NULL,
                absorptions    JSONB NOT NULL,
                pressure_30s   DOUBLE PRECISION NOT NULL,
                pressure_60s   DOUBLE PRECISION NOT NULL,
                pressure_120s  DOUBLE PRECISION NOT NULL,
                market_state   TEXT NOT NULL,
                PRIMARY KEY (time, security_id)
            );
            ",
        )
        .await?;

    for (stmt, label) in [
        (
            "SELECT create_hypertable('ticks', 'time', if_not_exists => true)",
            "ticks",
        ),
        (
            "SELECT create_hypertable('depth_levels_200', 'time', if_not_exists => true)",
            "depth_levels_200",
        ),
        (
            "SELECT create_hypertable('depth_signals', 'time', if_not_exists => true)",
            "depth_signals",
        ),
        (
            "ALTER TABLE ticks SET (timescaledb.compress, timescaledb.compress_segmentby = 'instrument_token')",
            "ticks compression",
        ),
        (
            "SELECT add_compression_policy('ticks', INTERVAL '7 days', if_not_exists => true)",
            "ticks compression policy",
        ),
        (
            "SELECT add_retention_policy('ticks', INTERVAL '90 days', if_not_exists => true)",
            "ticks retention policy",
        ),
        (
            "ALTER TABLE depth_levels_200 SET (timescaledb.compress, timescaledb.compress_segmentby = 'security_id,side')",
            "depth_levels_200 compression",
        ),
        (
            "SELECT add_compression_policy('depth_levels_200', INTERVAL '7 days', if_not_exists => true)",
            "depth_levels_200 compression policy",
        ),
        (
            "SELECT add_retention_policy('depth_levels_200', INTERVAL '60 days', if_not_exists => true)",
            "depth_levels_200 retention policy",
        ),
        (
            "SELECT add_compression_policy('depth_signals', INTERVAL '1 day', if_not_exists => true)",
            "depth_signals compression policy",
        ),
        (
            "SELECT add_retention_policy('depth_signals', INTERVAL '60 days', if_not_exists => true)",
            "depth_signals retention policy",
        ),
    ] {
        if let Err(e) = client.batch_execute(stmt).await {
            tracing::warn!(error = %e, statement = label, "timescale extension call failed; continuing with plain table");
        }
    }

    Ok(())
}
