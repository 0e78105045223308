//! 订单记录解码器
//!
//! 两路消息共用的纯函数解码入口：要么得到完整的 `OrderResult`，要么返回 `DecodeError`，
//! 不会产出部分填充的记录。

use order_proto::OrderResult;
use prost::Message;

/// 最短的合法记录：tag(0x0A) + 长度(1) + 至少 1 字节的 order_id
pub const MIN_RECORD_LEN: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// 截断、非法 wire type、非法 UTF-8 等协议层错误
    #[error("订单记录格式错误（{len} 字节）: {source}")]
    Malformed {
        len: usize,
        source: prost::DecodeError,
    },

    /// 协议层解码成功但缺少订单号
    #[error("订单记录缺少 order_id（{len} 字节）")]
    MissingOrderId { len: usize },
}

/// 解码一条订单记录
pub fn decode_order(bytes: &[u8]) -> Result<OrderResult, DecodeError> {
    let len = bytes.len();
    let order = OrderResult::decode(bytes).map_err(|source| DecodeError::Malformed { len, source })?;

    if order.order_id.is_empty() {
        return Err(DecodeError::MissingOrderId { len });
    }

    Ok(order)
}

/// 编码一条订单记录，供测试与工具使用
pub fn encode_order(order: &OrderResult) -> Vec<u8> {
    order.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_proto::{CartItem, Money, OrderItem};

    #[test]
    fn test_round_trip_recovers_order_id() {
        for id in ["o1", "order-with-a-much-longer-identifier", "订单-42", "x"] {
            let order = OrderResult {
                order_id: id.to_string(),
                shipping_tracking_id: "trk".to_string(),
                items: vec![OrderItem {
                    item: Some(CartItem {
                        product_id: "66VCHSJNUP".to_string(),
                        quantity: 3,
                    }),
                    cost: Some(Money {
                        currency_code: "EUR".to_string(),
                        units: 9,
                        nanos: 990_000_000,
                    }),
                }],
                ..Default::default()
            };

            let decoded = decode_order(&encode_order(&order)).unwrap();
            assert_eq!(decoded.order_id, id);
            assert_eq!(decoded, order);
        }
    }

    #[test]
    fn test_minimal_record() {
        let decoded = decode_order(&[0x0A, 0x01, b'z']).unwrap();
        assert_eq!(decoded.order_id, "z");
        assert_eq!(MIN_RECORD_LEN, 3);
    }

    #[test]
    fn test_every_payload_shorter_than_minimum_fails() {
        assert!(decode_order(&[]).is_err());

        for a in 0..=u8::MAX {
            assert!(decode_order(&[a]).is_err(), "1 字节负载 {a:#04x} 不应解码成功");
            for b in 0..=u8::MAX {
                assert!(
                    decode_order(&[a, b]).is_err(),
                    "2 字节负载 {a:#04x} {b:#04x} 不应解码成功"
                );
            }
        }
    }

    #[test]
    fn test_empty_payload_is_missing_order_id() {
        assert!(matches!(
            decode_order(&[]),
            Err(DecodeError::MissingOrderId { len: 0 })
        ));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        let bytes = encode_order(&OrderResult {
            order_id: "o-truncated".to_string(),
            ..Default::default()
        });

        let err = decode_order(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { len, .. } if len == bytes.len() - 2));
    }

    #[test]
    fn test_invalid_utf8_order_id_is_malformed() {
        let err = decode_order(&[0x0A, 0x02, 0xFF, 0xFE]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn test_record_without_order_id() {
        let bytes = encode_order(&OrderResult {
            shipping_tracking_id: "trk-only".to_string(),
            ..Default::default()
        });

        assert!(matches!(
            decode_order(&bytes),
            Err(DecodeError::MissingOrderId { .. })
        ));
    }
}
