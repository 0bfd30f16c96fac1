// 历史库模块
//
// DuckDB 要求单线程访问，这里沿用 Actor 模式：HistoryStore 把请求封装为
// 消息发给唯一持有连接的 StoreActor，对外提供异步的 RemoteStore 接口。

mod actor;
mod manager;
mod messages;

pub use manager::HistoryStore;
