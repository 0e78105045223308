//! 订单结果消息
//!
//! 字段编号与上游订单服务的 schema 保持一致，只能追加字段，不能复用已删除的编号。

/// 金额，`units` 为整数部分，`nanos` 为 10^-9 精度的小数部分
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Money {
    #[prost(string, tag = "1")]
    pub currency_code: ::prost::alloc::string::String,
    #[prost(int64, tag = "2")]
    pub units: i64,
    #[prost(int32, tag = "3")]
    pub nanos: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Address {
    #[prost(string, tag = "1")]
    pub street_address: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub city: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub state: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub country: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub zip_code: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CartItem {
    #[prost(string, tag = "1")]
    pub product_id: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderItem {
    #[prost(message, optional, tag = "1")]
    pub item: ::core::option::Option<CartItem>,
    #[prost(message, optional, tag = "2")]
    pub cost: ::core::option::Option<Money>,
}

/// 订单完成事件
///
/// 欺诈检测链路目前只读取 `order_id`，其余字段按 schema 完整解码后透传。
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderResult {
    #[prost(string, tag = "1")]
    pub order_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub shipping_tracking_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub shipping_cost: ::core::option::Option<Money>,
    #[prost(message, optional, tag = "4")]
    pub shipping_address: ::core::option::Option<Address>,
    #[prost(message, repeated, tag = "5")]
    pub items: ::prost::alloc::vec::Vec<OrderItem>,
}
