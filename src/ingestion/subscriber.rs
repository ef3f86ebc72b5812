use serde::Serialize;
use serde_json::json;

use crate::feed::ExchangeSegment;

/// Maximum instruments per subscription message (§4.1 wire contract).
pub const MAX_INSTRUMENTS_PER_MESSAGE: usize = 100;

/// RequestCode values for the Dhan-style JSON subscription protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Ticker,
    Quote,
    Full,
    Depth20Level,
}

impl SubscriptionKind {
    fn request_code(self) -> u16 {
        match self {
            SubscriptionKind::Ticker => 15,
            SubscriptionKind::Quote => 17,
            SubscriptionKind::Full => 21,
            SubscriptionKind::Depth20Level => 23,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct InstrumentRef {
    #[serde(rename = "ExchangeSegment")]
    exchange_segment: &'static str,
    #[serde(rename = "SecurityId")]
    security_id: String,
}

/// Build one or more subscription JSON messages for the given instruments,
/// chunked to `MAX_INSTRUMENTS_PER_MESSAGE` entries each.
pub fn build_subscription_messages(
    kind: SubscriptionKind,
    instruments: &[(ExchangeSegment, String)],
) -> Vec<String> {
    instruments
        .chunks(MAX_INSTRUMENTS_PER_MESSAGE)
        .map(|chunk| {
            let list: Vec<InstrumentRef> = chunk
                .iter()
                .map(|(seg, sid)| InstrumentRef {
                    exchange_segment: seg.as_wire_str(),
                    security_id: sid.clone(),
                })
                .collect();
            json!({
                "RequestCode": kind.request_code(),
                "InstrumentCount": list.len(),
                "InstrumentList": list,
            })
            .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_at_max_instruments_per_message() {
        let instruments: Vec<_> = (0..250)
            .map(|i| (ExchangeSegment::NseFno, i.to_string()))
            .collect();
        let messages = build_subscription_messages(SubscriptionKind::Full, &instruments);
        assert_eq!(messages.len(), 3);

        let first: serde_json::Value = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(first["RequestCode"], 21);
        assert_eq!(first["InstrumentCount"], 100);
        assert_eq!(first["InstrumentList"].as_array().unwrap().len(), 100);

        let last: serde_json::Value = serde_json::from_str(&messages[2]).unwrap();
        assert_eq!(last["InstrumentCount"], 50);
    }

    #[test]
    fn empty_instrument_list_produces_no_messages() {
        let messages = build_subscription_messages(SubscriptionKind::Ticker, &[]);
        assert!(messages.is_empty());
    }
}
