use tokio_postgres::Client;

use crate::core::AppError;
use crate::feed::NormalizedTick;

/// Batched UPSERT of normalized ticks using `UNNEST` to turn N rows into one
/// round trip. Tick volume is continuous and high-frequency, so batching
/// every flush into a single statement matters here in a way it doesn't for
/// the rarer full-table instrument replace.
pub async fn upsert_batch(client: &Client, ticks: &[NormalizedTick]) -> Result<u64, AppError> {
    if ticks.is_empty() {
        return Ok(0);
    }

    let mut times = Vec::with_capacity(ticks.len());
    let mut tokens = Vec::with_capacity(ticks.len());
    let mut last_price = Vec::with_capacity(ticks.len());
    let mut atp = Vec::with_capacity(ticks.len());
    let mut open = Vec::with_capacity(ticks.len());
    let mut high = Vec::with_capacity(ticks.len());
    let mut low = Vec::with_capacity(ticks.len());
    let mut close = Vec::with_capacity(ticks.len());
    let mut prev_close = Vec::with_capacity(ticks.len());
    let mut ltq = Vec::with_capacity(ticks.len());
    let mut volume = Vec::with_capacity(ticks.len());
    let mut buy_qty = Vec::with_capacity(ticks.len());
    let mut sell_qty = Vec::with_capacity(ticks.len());
    let mut oi = Vec::with_capacity(ticks.len());
    let mut oi_high = Vec::with_capacity(ticks.len());
    let mut oi_low = Vec::with_capacity(ticks.len());
    let mut bid_prices = Vec::with_capacity(ticks.len());
    let mut bid_qtys = Vec::with_capacity(ticks.len());
    let mut bid_orders = Vec::with_capacity(ticks.len());
    let mut ask_prices = Vec::with_capacity(ticks.len());
    let mut ask_qtys = Vec::with_capacity(ticks.len());
    let mut ask_orders = Vec::with_capacity(ticks.len());
    let mut change = Vec::with_capacity(ticks.len());
    let mut change_pct = Vec::with_capacity(ticks.len());
    let mut spread = Vec::with_capacity(ticks.len());
    let mut mid = Vec::with_capacity(ticks.len());
    let mut imbalance = Vec::with_capacity(ticks.len());

    for t in ticks {
        times.push(t.received_at);
        tokens.push(t.instrument_token);
        last_price.push(t.last_price);
        atp.push(t.avg_traded_price);
        open.push(t.open);
        high.push(t.high);
        low.push(t.low);
        close.push(t.close);
        prev_close.push(t.prev_close);
        ltq.push(t.last_traded_qty);
        volume.push(t.volume_traded);
        buy_qty.push(t.total_buy_qty);
        sell_qty.push(t.total_sell_qty);
        oi.push(t.oi);
        oi_high.push(t.oi_day_high);
        oi_low.push(t.oi_day_low);
        bid_prices.push(t.bid_prices.to_vec());
        bid_qtys.push(t.bid_qtys.to_vec());
        bid_orders.push(t.bid_orders.to_vec());
        ask_prices.push(t.ask_prices.to_vec());
        ask_qtys.push(t.ask_qtys.to_vec());
        ask_orders.push(t.ask_orders.to_vec());
        change.push(t.change);
        change_pct.push(t.change_pct);
        spread.push(t.spread);
        mid.push(t.mid);
        imbalance.push(t.order_imbalance);
    }

    let rows = client
        .execute(
            "INSERT INTO ticks (
                time, instrument_token, last_price, avg_traded_price, open, high, low, close,
                prev_close, last_traded_qty, volume_traded, total_buy_qty, total_sell_qty,
                oi, oi_day_high, oi_day_low,
                bid_prices, bid_qtys, bid_orders, ask_prices, ask_qtys, ask_orders,
                change, change_pct, spread, mid, order_imbalance
            )
            SELECT * FROM UNNEST(
                $1::timestamptz[], $2::int[], $3::float8[], $4::float8[], $5::float8[], $6::float8[],
                $7::float8[], $8::float8[], $9::float8[], $10::bigint[], $11::bigint[], $12::bigint[],
                $13::bigint[], $14::bigint[], $15::bigint[], $16::bigint[],
                $17::float8[][], $18::bigint[][], $19::int[][], $20::float8[][], $21::bigint[][], $22::int[][],
                $23::float8[], $24::float8[], $25::float8[], $26::float8[], $27::bigint[]
            )
            ON CONFLICT (time, instrument_token) DO UPDATE SET
                last_price = EXCLUDED.last_price,
                avg_traded_price = EXCLUDED.avg_traded_price,
                open = EXCLUDED.open,
                high = EXCLUDED.high,
                low = EXCLUDED.low,
                close = EXCLUDED.close,
                prev_close = EXCLUDED.prev_close,
                last_traded_qty = EXCLUDED.last_traded_qty,
                volume_traded = EXCLUDED.volume_traded,
                total_buy_qty = EXCLUDED.total_buy_qty,
                total_sell_qty = EXCLUDED.total_sell_qty,
                oi = EXCLUDED.oi,
                oi_day_high = EXCLUDED.oi_day_high,
                oi_day_low = EXCLUDED.oi_day_low,
                bid_prices = EXCLUDED.bid_prices,
                bid_qtys = EXCLUDED.bid_qtys,
                bid_orders = EXCLUDED.bid_orders,
                ask_prices = EXCLUDED.ask_prices,
                ask_qtys = EXCLUDED.ask_qtys,
                ask_orders = EXCLUDED.ask_orders,
                change = EXCLUDED.change,
                change_pct = EXCLUDED.change_pct,
                spread = EXCLUDED.spread,
                mid = EXCLUDED.mid,
                order_imbalance = EXCLUDED.order_imbalance
            ",
            &[
                &times, &tokens, &last_price, &atp, &open, &high, &low, &close, &prev_close,
                &ltq, &volume, &buy_qty, &sell_qty, &oi, &oi_high, &oi_low,
                &bid_prices, &bid_qtys, &bid_orders, &ask_prices, &ask_qtys, &ask_orders,
                &change, &change_pct, &spread, &mid, &imbalance,
            ],
        )
        .await?;

    Ok(rows)
}
