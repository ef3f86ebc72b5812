//! Binary frame decoding for the tick feed (§4.2). A decoder is a pure
//! function of its input bytes (§8 property 4): no I/O, no shared state.
//! Malformed frames return a `DecodeError`; callers count and drop them,
//! they never tear down the connection (§7).

use std::fmt;

/// Exchange segment enumeration. This mapping is LOAD-BEARING and must match
/// the feed vendor's wire values exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeSegment {
    IdxI,
    NseEq,
    NseFno,
    NseCurrency,
    BseEq,
    McxComm,
    BseCurrency,
    BseFno,
}

impl ExchangeSegment {
    pub fn from_segment_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::IdxI),
            1 => Some(Self::NseEq),
            2 => Some(Self::NseFno),
            3 => Some(Self::NseCurrency),
            4 => Some(Self::BseEq),
            5 => Some(Self::McxComm),
            7 => Some(Self::BseCurrency),
            8 => Some(Self::BseFno),
            _ => None,
        }
    }

    pub fn segment_code(self) -> u8 {
        match self {
            Self::IdxI => 0,
            Self::NseEq => 1,
            Self::NseFno => 2,
            Self::NseCurrency => 3,
            Self::BseEq => 4,
            Self::McxComm => 5,
            Self::BseCurrency => 7,
            Self::BseFno => 8,
        }
    }

    /// The string enum value used in JSON subscription messages
    /// (`InstrumentList[].ExchangeSegment`).
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::IdxI => "IDX_I",
            Self::NseEq => "NSE_EQ",
            Self::NseFno => "NSE_FNO",
            Self::NseCurrency => "NSE_CURRENCY",
            Self::BseEq => "BSE_EQ",
            Self::McxComm => "MCX_COMM",
            Self::BseCurrency => "BSE_CURRENCY",
            Self::BseFno => "BSE_FNO",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "IDX_I" => Some(Self::IdxI),
            "NSE_EQ" => Some(Self::NseEq),
            "NSE_FNO" => Some(Self::NseFno),
            "NSE_CURRENCY" => Some(Self::NseCurrency),
            "BSE_EQ" => Some(Self::BseEq),
            "MCX_COMM" => Some(Self::McxComm),
            "BSE_CURRENCY" => Some(Self::BseCurrency),
            "BSE_FNO" => Some(Self::BseFno),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResponseCode {
    Index,
    Ticker,
    Quote,
    Oi,
    PrevClose,
    MarketStatus,
    Full,
    Disconnect,
}

impl FeedResponseCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Index),
            2 => Some(Self::Ticker),
            4 => Some(Self::Quote),
            5 => Some(Self::Oi),
            6 => Some(Self::PrevClose),
            7 => Some(Self::MarketStatus),
            8 => Some(Self::Full),
            50 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for DecodeError {}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub response_code: FeedResponseCode,
    pub message_length: i16,
    pub exchange_segment_code: u8,
    pub exchange_segment: Option<ExchangeSegment>,
    pub security_id: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthLevel {
    pub bid_qty: i32,
    pub ask_qty: i32,
    pub bid_orders: i16,
    pub ask_orders: i16,
    pub bid_price: f32,
    pub ask_price: f32,
}

/// One decoded wire frame. Each variant carries only the fields that
/// particular response code contains (§4.2's frame taxonomy table).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Index {
        header: FrameHeader,
        index_value: f32,
        index_time: i32,
    },
    Ticker {
        header: FrameHeader,
        last_price: f32,
        last_trade_time: i32,
    },
    Quote {
        header: FrameHeader,
        last_price: f32,
        last_traded_qty: i32,
        last_trade_time: i32,
        avg_traded_price: f32,
        volume_traded: i32,
        total_sell_qty: i32,
        total_buy_qty: i32,
        open: f32,
        close: f32,
        high: f32,
        low: f32,
    },
    Oi {
        header: FrameHeader,
        oi: i32,
    },
    PrevClose {
        header: FrameHeader,
        prev_close: f32,
        prev_oi: i32,
    },
    MarketStatus {
        header: FrameHeader,
        raw: Vec<u8>,
    },
    Full {
        header: FrameHeader,
        last_price: f32,
        last_traded_qty: i32,
        last_trade_time: i32,
        avg_traded_price: f32,
        volume_traded: i32,
        total_sell_qty: i32,
        total_buy_qty: i32,
        oi: i32,
        oi_day_high: i32,
        oi_day_low: i32,
        open: f32,
        close: f32,
        high: f32,
        low: f32,
        depth: [DepthLevel; 5],
    },
    Disconnect {
        header: FrameHeader,
        reason_code: i16,
    },
}

impl FeedFrame {
    pub fn header(&self) -> &FrameHeader {
        match self {
            FeedFrame::Index { header, .. }
            | FeedFrame::Ticker { header, .. }
            | FeedFrame::Quote { header, .. }
            | FeedFrame::Oi { header, .. }
            | FeedFrame::PrevClose { header, .. }
            | FeedFrame::MarketStatus { header, .. }
            | FeedFrame::Full { header, .. }
            | FeedFrame::Disconnect { header, .. } => header,
        }
    }
}

#[inline(always)]
fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8, DecodeError> {
    let v = *data
        .get(*offset)
        .ok_or_else(|| DecodeError("frame truncated reading u8".into()))?;
    *offset += 1;
    Ok(v)
}

#[inline(always)]
fn read_i16_le(data: &[u8], offset: &mut usize) -> Result<i16, DecodeError> {
    let end = *offset + 2;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| DecodeError("frame truncated reading i16".into()))?;
    *offset = end;
    Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline(always)]
fn read_i32_le(data: &[u8], offset: &mut usize) -> Result<i32, DecodeError> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| DecodeError("frame truncated reading i32".into()))?;
    *offset = end;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

#[inline(always)]
fn read_f32_le(data: &[u8], offset: &mut usize) -> Result<f32, DecodeError> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| DecodeError("frame truncated reading f32".into()))?;
    *offset = end;
    Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
}

const HEADER_LEN: usize = 8;

fn parse_header(data: &[u8]) -> Result<FrameHeader, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError(format!(
            "frame too short for header: {} bytes",
            data.len()
        )));
    }
    let mut off = 0usize;
    let code_byte = read_u8(data, &mut off)?;
    let response_code = FeedResponseCode::from_byte(code_byte)
        .ok_or_else(|| DecodeError(format!("unknown response code: {code_byte}")))?;
    let message_length = read_i16_le(data, &mut off)?;
    let exchange_segment_code = read_u8(data, &mut off)?;
    let exchange_segment = ExchangeSegment::from_segment_code(exchange_segment_code);
    let security_id = read_i32_le(data, &mut off)?;

    Ok(FrameHeader {
        response_code,
        message_length,
        exchange_segment_code,
        exchange_segment,
        security_id,
    })
}

/// Decode a single frame (not a stream). `data` must be at least
/// header-size; a malformed frame yields `DecodeError` rather than a panic.
///
/// Trailing bytes beyond the fields a given response code defines (e.g. a
/// single reserved/padding byte some frame kinds carry) are tolerated and
/// ignored; only the minimum required prefix is validated.
pub fn decode_frame(data: &[u8]) -> Result<FeedFrame, DecodeError> {
    let header = parse_header(data)?;
    let payload = &data[HEADER_LEN..];

    match header.response_code {
        FeedResponseCode::Index => {
            let mut off = 0;
            let index_value = read_f32_le(payload, &mut off)?;
            let index_time = read_i32_le(payload, &mut off)?;
            Ok(FeedFrame::Index {
                header,
                index_value,
                index_time,
            })
        }
        FeedResponseCode::Ticker => {
            let mut off = 0;
            let last_price = read_f32_le(payload, &mut off)?;
            let last_trade_time = read_i32_le(payload, &mut off)?;
            Ok(FeedFrame::Ticker {
                header,
                last_price,
                last_trade_time,
            })
        }
        FeedResponseCode::Quote => {
            let mut off = 0;
            let last_price = read_f32_le(payload, &mut off)?;
            let last_traded_qty = read_i32_le(payload, &mut off)?;
            let last_trade_time = read_i32_le(payload, &mut off)?;
            let avg_traded_price = read_f32_le(payload, &mut off)?;
            let volume_traded = read_i32_le(payload, &mut off)?;
            let total_sell_qty = read_i32_le(payload, &mut off)?;
            let total_buy_qty = read_i32_le(payload, &mut off)?;
            let open = read_f32_le(payload, &mut off)?;
            let close = read_f32_le(payload, &mut off)?;
            let high = read_f32_le(payload, &mut off)?;
            let low = read_f32_le(payload, &mut off)?;
            Ok(FeedFrame::Quote {
                header,
                last_price,
                last_traded_qty,
                last_trade_time,
                avg_traded_price,
                volume_traded,
                total_sell_qty,
                total_buy_qty,
                open,
                close,
                high,
                low,
            })
        }
        FeedResponseCode::Oi => {
            let mut off = 0;
            let oi = read_i32_le(payload, &mut off)?;
            Ok(FeedFrame::Oi { header, oi })
        }
        FeedResponseCode::PrevClose => {
            let mut off = 0;
            let prev_close = read_f32_le(payload, &mut off)?;
            let prev_oi = read_i32_le(payload, &mut off)?;
            Ok(FeedFrame::PrevClose {
                header,
                prev_close,
                prev_oi,
            })
        }
        FeedResponseCode::MarketStatus => Ok(FeedFrame::MarketStatus {
            header,
            raw: payload.to_vec(),
        }),
        FeedResponseCode::Full => {
            let mut off = 0;
            let last_price = read_f32_le(payload, &mut off)?;
            let last_traded_qty = read_i32_le(payload, &mut off)?;
            let last_trade_time = read_i32_le(payload, &mut off)?;
            let avg_traded_price = read_f32_le(payload, &mut off)?;
            let volume_traded = read_i32_le(payload, &mut off)?;
            let total_sell_qty = read_i32_le(payload, &mut off)?;
            let total_buy_qty = read_i32_le(payload, &mut off)?;
            let oi = read_i32_le(payload, &mut off)?;
            let oi_day_high = read_i32_le(payload, &mut off)?;
            let oi_day_low = read_i32_le(payload, &mut off)?;
            let open = read_f32_le(payload, &mut off)?;
            let close = read_f32_le(payload, &mut off)?;
            let high = read_f32_le(payload, &mut off)?;
            let low = read_f32_le(payload, &mut off)?;

            let mut depth = [DepthLevel {
                bid_qty: 0,
                ask_qty: 0,
                bid_orders: 0,
                ask_orders: 0,
                bid_price: 0.0,
                ask_price: 0.0,
            }; 5];
            for level in &mut depth {
                level.bid_qty = read_i32_le(payload, &mut off)?;
                level.ask_qty = read_i32_le(payload, &mut off)?;
                level.bid_orders = read_i16_le(payload, &mut off)?;
                level.ask_orders = read_i16_le(payload, &mut off)?;
                level.bid_price = read_f32_le(payload, &mut off)?;
                level.ask_price = read_f32_le(payload, &mut off)?;
            }

            Ok(FeedFrame::Full {
                header,
                last_price,
                last_traded_qty,
                last_trade_time,
                avg_traded_price,
                volume_traded,
                total_sell_qty,
                total_buy_qty,
                oi,
                oi_day_high,
                oi_day_low,
                open,
                close,
                high,
                low,
                depth,
            })
        }
        FeedResponseCode::Disconnect => {
            let mut off = 0;
            let reason_code = read_i16_le(payload, &mut off)?;
            Ok(FeedFrame::Disconnect {
                header,
                reason_code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(code: u8, len: i16, segment: u8, security_id: i32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.push(code);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.push(segment);
        buf.extend_from_slice(&security_id.to_le_bytes());
        buf
    }

    /// Scenario S1: full packet decode, 163-byte frame.
    #[test]
    fn s1_full_packet_decode() {
        let mut buf = header_bytes(8, 163, 2, 49229);

        // Trade block (54 bytes).
        buf.extend_from_slice(&24500.0f32.to_le_bytes()); // last_price
        buf.extend_from_slice(&0i32.to_le_bytes()); // last_traded_qty
        buf.extend_from_slice(&0i32.to_le_bytes()); // last_trade_time
        buf.extend_from_slice(&0.0f32.to_le_bytes()); // avg_traded_price
        buf.extend_from_slice(&500000i32.to_le_bytes()); // volume_traded
        buf.extend_from_slice(&0i32.to_le_bytes()); // total_sell_qty
        buf.extend_from_slice(&0i32.to_le_bytes()); // total_buy_qty
        buf.extend_from_slice(&15000000i32.to_le_bytes()); // oi
        buf.extend_from_slice(&0i32.to_le_bytes()); // oi_day_high
        buf.extend_from_slice(&0i32.to_le_bytes()); // oi_day_low
        buf.extend_from_slice(&0.0f32.to_le_bytes()); // open
        buf.extend_from_slice(&0.0f32.to_le_bytes()); // close
        buf.extend_from_slice(&0.0f32.to_le_bytes()); // high
        buf.extend_from_slice(&0.0f32.to_le_bytes()); // low
        assert_eq!(buf.len(), 8 + 54);

        // 5 depth levels, 20 bytes each. Level 0 carries the S1 literal values.
        for i in 0..5u32 {
            let (bid_qty, ask_qty, bid_orders, ask_orders, bid_price, ask_price) = if i == 0 {
                (100000i32, 120000i32, 50i16, 60i16, 24498.0f32, 24502.0f32)
            } else {
                (0, 0, 0, 0, 0.0, 0.0)
            };
            buf.extend_from_slice(&bid_qty.to_le_bytes());
            buf.extend_from_slice(&ask_qty.to_le_bytes());
            buf.extend_from_slice(&bid_orders.to_le_bytes());
            buf.extend_from_slice(&ask_orders.to_le_bytes());
            buf.extend_from_slice(&bid_price.to_le_bytes());
            buf.extend_from_slice(&ask_price.to_le_bytes());
        }
        assert_eq!(buf.len(), 8 + 54 + 100); // 162 real bytes
        buf.push(0); // one reserved trailing byte -> 163 total
        assert_eq!(buf.len(), 163);

        let frame = decode_frame(&buf).expect("decode succeeds");
        match frame {
            FeedFrame::Full {
                header,
                last_price,
                volume_traded,
                oi,
                depth,
                ..
            } => {
                assert_eq!(header.security_id, 49229);
                assert_eq!(header.exchange_segment, Some(ExchangeSegment::NseFno));
                assert_eq!(last_price, 24500.0);
                assert_eq!(volume_traded, 500000);
                assert_eq!(oi, 15000000);
                assert_eq!(depth.len(), 5);
                assert_eq!(depth[0].bid_price, 24498.0);
                assert_eq!(depth[0].ask_price, 24502.0);
                assert_eq!(depth[0].bid_qty, 100000);
                assert_eq!(depth[0].ask_qty, 120000);
            }
            other => panic!("expected Full frame, got {other:?}"),
        }
    }

    /// Invariant 6: exchange-segment mapping matches the table exactly.
    #[test]
    fn exchange_segment_mapping_matches_table() {
        let cases = [
            (0u8, ExchangeSegment::IdxI),
            (1, ExchangeSegment::NseEq),
            (2, ExchangeSegment::NseFno),
            (3, ExchangeSegment::NseCurrency),
            (4, ExchangeSegment::BseEq),
            (5, ExchangeSegment::McxComm),
            (7, ExchangeSegment::BseCurrency),
            (8, ExchangeSegment::BseFno),
        ];
        for (code, expected) in cases {
            assert_eq!(ExchangeSegment::from_segment_code(code), Some(expected));
            assert_eq!(expected.segment_code(), code);
        }
        assert_eq!(ExchangeSegment::from_segment_code(6), None);
        assert_eq!(ExchangeSegment::from_segment_code(9), None);
    }

    /// Invariant 4: decoder is a pure function: identical bytes, identical
    /// records.
    #[test]
    fn decode_is_deterministic() {
        let buf = header_bytes(2, 16, 1, 1333);
        let mut full = buf.clone();
        full.extend_from_slice(&1500.0f32.to_le_bytes());
        full.extend_from_slice(&1_700_000_000i32.to_le_bytes());

        let a = decode_frame(&full).unwrap();
        let b = decode_frame(&full).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_response_code_is_decode_error_not_panic() {
        let mut buf = vec![99u8];
        buf.extend_from_slice(&16i16.to_le_bytes());
        buf.push(1);
        buf.extend_from_slice(&1i32.to_le_bytes());
        assert!(decode_frame(&buf).is_err());
    }

    #[test]
    fn truncated_frame_is_decode_error() {
        let buf = vec![8u8, 1, 0, 2];
        assert!(decode_frame(&buf).is_err());
    }

    #[test]
    fn disconnect_frame_decodes_reason_code() {
        let mut buf = header_bytes(50, 10, 0, 0);
        buf.extend_from_slice(&805i16.to_le_bytes());
        let frame = decode_frame(&buf).unwrap();
        match frame {
            FeedFrame::Disconnect { reason_code, .. } => assert_eq!(reason_code, 805),
            other => panic!("expected Disconnect, got {other:?}"),
        }
    }
}
