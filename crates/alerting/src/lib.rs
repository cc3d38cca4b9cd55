//! # Alerting
//!
//! 告警分发模块。
//!
//! 负责：
//! - 通过独立游标读取同一条记录流
//! - 按谓词筛选记录，生成 `AlertEvent`
//! - Fan-out 到多个 notifier，队列满时丢弃，不阻塞读取

pub mod error;
pub mod fanout;
pub mod handle;
pub mod metrics;
pub mod notifiers;
pub mod predicate;

pub use contracts::{AlertEvent, Notifier};
pub use error::AlertError;
pub use fanout::{AlertFanOut, AlertFanOutBuilder, AlertReport};
pub use handle::{dispatch, NotifierHandle};
pub use metrics::{AlertMetrics, MetricsSnapshot};
pub use notifiers::{LogNotifier, RecordingNotifier, UdpNotifier, WebhookNotifier};
pub use predicate::AlertPredicate;
