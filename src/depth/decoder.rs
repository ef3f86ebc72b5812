use crate::feed::frame::DecodeError;

/// 200-level market depth (§4.4). Response codes 41/51 carry bid and ask
/// books separately; 50 is the feed's disconnect code and is handled
/// upstream of this decoder, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthLevel200 {
    pub price: f64,
    pub quantity: i64,
    pub order_count: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthPacket {
    pub security_id: i32,
    pub side: DepthSide,
    pub levels: Vec<DepthLevel200>,
}

const HEADER_LEN: usize = 8;
const LEVEL_LEN: usize = 12;

fn read_f32_le(data: &[u8], offset: &mut usize) -> Result<f32, DecodeError> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| DecodeError("depth frame truncated reading f32".into()))?;
    *offset = end;
    Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i32_le(data: &[u8], offset: &mut usize) -> Result<i32, DecodeError> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| DecodeError("depth frame truncated reading i32".into()))?;
    *offset = end;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

/// `response_code` is 41 for bid-side 200-level depth, 51 for ask-side.
/// `security_id` is taken from the 8-byte frame header preceding this
/// payload (decoded by the caller alongside the main feed header).
pub fn decode_depth_packet(response_code: u8, security_id: i32, payload: &[u8]) -> Result<DepthPacket, DecodeError> {
    let side = match response_code {
        41 => DepthSide::Bid,
        51 => DepthSide::Ask,
        other => return Err(DecodeError(format!("unknown depth response code: {other}"))),
    };

    if payload.len() % LEVEL_LEN != 0 {
        return Err(DecodeError(format!(
            "depth payload length {} is not a multiple of {LEVEL_LEN}",
            payload.len()
        )));
    }

    let mut levels = Vec::with_capacity(payload.len() / LEVEL_LEN);
    let mut offset = 0;
    while offset < payload.len() {
        let price = read_f32_le(payload, &mut offset)? as f64;
        let quantity = read_i32_le(payload, &mut offset)? as i64;
        let order_count = read_i32_le(payload, &mut offset)?;
        levels.push(DepthLevel200 {
            price,
            quantity,
            order_count,
        });
    }

    Ok(DepthPacket {
        security_id,
        side,
        levels,
    })
}

/// Given a full wire frame (header + payload) for a 200-level depth
/// message, parse the header and dispatch to `decode_depth_packet`.
pub fn decode_depth_frame(data: &[u8]) -> Result<DepthPacket, DecodeError> {
    if data.len() < HEADER_LEN {
        return Err(DecodeError("depth frame shorter than header".into()));
    }
    let response_code = data[0];
    let security_id = i32::from_le_bytes(data[4..8].try_into().unwrap());
    decode_depth_packet(response_code, security_id, &data[HEADER_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_bytes(price: f32, qty: i32, orders: i32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&price.to_le_bytes());
        buf.extend_from_slice(&qty.to_le_bytes());
        buf.extend_from_slice(&orders.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_bid_side_levels() {
        let mut payload = Vec::new();
        payload.extend(level_bytes(100.5, 1000, 12));
        payload.extend(level_bytes(100.0, 500, 4));

        let packet = decode_depth_packet(41, 49229, &payload).unwrap();
        assert_eq!(packet.side, DepthSide::Bid);
        assert_eq!(packet.levels.len(), 2);
        assert_eq!(packet.levels[0].price, 100.5);
        assert_eq!(packet.levels[0].quantity, 1000);
        assert_eq!(packet.levels[1].order_count, 4);
    }

    #[test]
    fn rejects_misaligned_payload() {
        let payload = vec![0u8; 13];
        assert!(decode_depth_packet(41, 1, &payload).is_err());
    }

    #[test]
    fn rejects_unknown_response_code() {
        let payload = level_bytes(1.0, 1, 1);
        assert!(decode_depth_packet(9, 1, &payload).is_err());
    }
}
