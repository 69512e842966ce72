//! Plugin Events - 도메인 이벤트와 Hook 레지스트리
//!
//! 이벤트 타입 문자열을 키로 하는 인프로세스 pub/sub 버스.
//!
//! - `emit`: 등록 순서대로 동기 디스패치, 핸들러 실패는 로그만 남기고 계속
//! - `emit_async`: 데드라인이 있는 분리 작업으로 디스패치 (완료 신호 없음)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tally_foundation::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 비동기 디스패치 기본 데드라인
pub const DEFAULT_ASYNC_DEADLINE: Duration = Duration::from_secs(30);

// ============================================================================
// EventType - 닫힌 이벤트 어휘
// ============================================================================

macro_rules! event_types {
    ($($variant:ident => $name:literal,)+) => {
        /// 도메인 이벤트 타입
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant,)+
        }

        impl EventType {
            const ALL: &'static [EventType] = &[$(EventType::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventType::$variant => $name,)+
                }
            }
        }

        impl FromStr for EventType {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EventType::$variant),)+
                    other => Err(format!("unknown event type '{other}'")),
                }
            }
        }
    };
}

event_types! {
    InvoiceCreated => "invoice.created",
    InvoiceUpdated => "invoice.updated",
    InvoiceSent => "invoice.sent",
    InvoicePaid => "invoice.paid",
    InvoiceOverdue => "invoice.overdue",
    InvoiceVoided => "invoice.voided",
    InvoiceDeleted => "invoice.deleted",
    PaymentReceived => "payment.received",
    PaymentRefunded => "payment.refunded",
    PaymentFailed => "payment.failed",
    ContactCreated => "contact.created",
    ContactUpdated => "contact.updated",
    ContactDeleted => "contact.deleted",
    JournalEntryCreated => "journal_entry.created",
    JournalEntryPosted => "journal_entry.posted",
    JournalEntryVoided => "journal_entry.voided",
    RecurringCreated => "recurring.created",
    RecurringGenerated => "recurring.generated",
    RecurringPaused => "recurring.paused",
    BankingTransactionImported => "banking.transaction_imported",
    BankingTransactionReconciled => "banking.transaction_reconciled",
    BankingAccountConnected => "banking.account_connected",
    PayrollRunCreated => "payroll.run_created",
    PayrollRunApproved => "payroll.run_approved",
    PayrollRunPaid => "payroll.run_paid",
    TenantCreated => "tenant.created",
    TenantUpdated => "tenant.updated",
    TenantDeleted => "tenant.deleted",
    EmailSent => "email.sent",
    EmailFailed => "email.failed",
}

impl EventType {
    /// 전체 이벤트 타입
    pub fn all() -> &'static [EventType] {
        Self::ALL
    }

    /// 카테고리 (점 앞부분, 예: `journal_entry`)
    pub fn category(&self) -> &'static str {
        let name = self.as_str();
        name.split_once('.').map(|(c, _)| c).unwrap_or(name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 어휘에 포함된 이벤트 타입인지 확인
pub fn is_valid_event_type(event_type: &str) -> bool {
    EventType::from_str(event_type).is_ok()
}

// ============================================================================
// Event
// ============================================================================

/// 도메인 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 이벤트 타입 문자열 (어휘 밖의 값도 허용)
    pub event_type: String,
    pub tenant_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, tenant_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn of(event_type: EventType, tenant_id: impl Into<String>, payload: Value) -> Self {
        Self::new(event_type.as_str(), tenant_id, payload)
    }
}

// ============================================================================
// HookHandler
// ============================================================================

/// 이벤트 핸들러
///
/// `cancel`은 비동기 디스패치 데드라인에서 취소된다. 장시간 작업은 이를 확인해야 한다.
#[async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, event: &Event, cancel: &CancellationToken) -> Result<()>;
}

/// 클로저 기반 핸들러
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Event, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> HookHandler for FnHandler<F>
where
    F: Fn(Event, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: &Event, cancel: &CancellationToken) -> Result<()> {
        (self.f)(event.clone(), cancel.clone()).await
    }
}

/// 클로저를 `Arc<dyn HookHandler>`로 변환
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(Event, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler::new(f))
}

// ============================================================================
// HookRegistry
// ============================================================================

/// 구독자 (소유 플러그인, 핸들러 이름, 호출 대상)
#[derive(Clone)]
pub struct Subscriber {
    /// 플러그인 ID (플러그인 외 호출자는 `None`)
    pub owner: Option<String>,
    pub handler_name: String,
    handler: Arc<dyn HookHandler>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("owner", &self.owner)
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// Hook 레지스트리
pub struct HookRegistry {
    /// 이벤트 타입 → 등록 순서의 구독자 목록
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    async_deadline: Duration,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::with_deadline(DEFAULT_ASYNC_DEADLINE)
    }

    pub fn with_deadline(async_deadline: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            async_deadline,
        }
    }

    // ========================================================================
    // 등록/해제
    // ========================================================================

    /// 플러그인과 무관한 구독자 등록
    pub fn register(
        &self,
        event_type: &str,
        handler_name: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        self.insert(event_type, None, handler_name.into(), handler);
    }

    /// 플러그인 소유 구독자 등록
    pub fn register_plugin_hook(
        &self,
        plugin_id: &str,
        event_type: &str,
        handler_name: impl Into<String>,
        handler: Arc<dyn HookHandler>,
    ) {
        self.insert(
            event_type,
            Some(plugin_id.to_string()),
            handler_name.into(),
            handler,
        );
    }

    fn insert(
        &self,
        event_type: &str,
        owner: Option<String>,
        handler_name: String,
        handler: Arc<dyn HookHandler>,
    ) {
        if !is_valid_event_type(event_type) {
            debug!(event_type, "Registering hook for event type outside the vocabulary");
        }

        let subscriber = Subscriber {
            owner,
            handler_name,
            handler,
        };
        self.subscribers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(subscriber);
    }

    /// 해당 플러그인의 모든 구독자 제거. 제거된 수 반환
    pub fn unregister_plugin_hooks(&self, plugin_id: &str) -> usize {
        let mut subscribers = self.subscribers.write();
        let mut removed = 0;

        subscribers.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.owner.as_deref() != Some(plugin_id));
            removed += before - list.len();
            !list.is_empty()
        });

        removed
    }

    // ========================================================================
    // 디스패치
    // ========================================================================

    fn snapshot(&self, event_type: &str) -> Vec<Subscriber> {
        self.subscribers
            .read()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// 동기 디스패치. 핸들러 실패는 로그로만 남긴다.
    pub async fn emit(&self, event: &Event) {
        let subscribers = self.snapshot(&event.event_type);
        dispatch(&subscribers, event, &CancellationToken::new()).await;
    }

    /// 분리된 작업으로 디스패치 (fire-and-forget).
    ///
    /// 데드라인에 취소 토큰이 취소되고, 남은 핸들러는 호출되지 않는다.
    pub fn emit_async(&self, event: Event) {
        let subscribers = self.snapshot(&event.event_type);
        if subscribers.is_empty() {
            return;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(
                    event_type = %event.event_type,
                    "No async runtime available, dropping event"
                );
                return;
            }
        };

        let deadline = self.async_deadline;
        runtime.spawn(async move {
            let cancel = CancellationToken::new();
            let timer = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    cancel.cancel();
                })
            };

            dispatch(&subscribers, &event, &cancel).await;
            timer.abort();
        });
    }

    // ========================================================================
    // 조회
    // ========================================================================

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn total_handlers(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    /// 구독자가 있는 이벤트 타입 (정렬)
    pub fn registered_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.subscribers.read().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn plugin_handler_count(&self, plugin_id: &str) -> usize {
        self.subscribers
            .read()
            .values()
            .flatten()
            .filter(|s| s.owner.as_deref() == Some(plugin_id))
            .count()
    }

    pub fn is_valid_event_type(&self, event_type: &str) -> bool {
        is_valid_event_type(event_type)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(subscribers: &[Subscriber], event: &Event, cancel: &CancellationToken) {
    for (index, subscriber) in subscribers.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(
                event_type = %event.event_type,
                skipped = subscribers.len() - index,
                "Hook dispatch deadline exceeded, skipping remaining handlers"
            );
            return;
        }

        if let Err(e) = subscriber.handler.handle(event, cancel).await {
            warn!(
                event_type = %event.event_type,
                tenant_id = %event.tenant_id,
                plugin = subscriber.owner.as_deref().unwrap_or("-"),
                handler = %subscriber.handler_name,
                "Hook handler failed: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_foundation::Error;

    fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn HookHandler> {
        handler_fn(move |_event, _cancel| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
        })
    }

    #[test]
    fn test_vocabulary() {
        assert!(is_valid_event_type("invoice.paid"));
        assert!(is_valid_event_type("journal_entry.posted"));
        assert!(!is_valid_event_type("invoice.exploded"));

        for event_type in EventType::all() {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), *event_type);
        }
        assert_eq!(EventType::JournalEntryPosted.category(), "journal_entry");
        assert_eq!(EventType::PayrollRunPaid.category(), "payroll");
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_dispatch() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register(
            "invoice.created",
            "failing",
            handler_fn(|_event, _cancel| async { Err::<(), _>(Error::Internal("boom".into())) }),
        );
        registry.register("invoice.created", "counting", counting(calls.clone()));

        registry
            .emit(&Event::of(EventType::InvoiceCreated, "t1", json!({"id": 1})))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_plugin_hooks() {
        let registry = HookRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register_plugin_hook("p1", "invoice.paid", "a", counting(calls.clone()));
        registry.register_plugin_hook("p1", "payment.received", "b", counting(calls.clone()));
        registry.register_plugin_hook("p2", "invoice.paid", "c", counting(calls.clone()));
        registry.register("invoice.paid", "core", counting(calls.clone()));
        assert_eq!(registry.total_handlers(), 4);
        assert_eq!(registry.plugin_handler_count("p1"), 2);

        assert_eq!(registry.unregister_plugin_hooks("p1"), 2);
        assert_eq!(registry.total_handlers(), 2);
        assert_eq!(registry.handler_count("invoice.paid"), 2);
        assert_eq!(registry.handler_count("payment.received"), 0);
        assert_eq!(registry.registered_event_types(), vec!["invoice.paid"]);

        // idempotent
        assert_eq!(registry.unregister_plugin_hooks("p1"), 0);

        registry
            .emit(&Event::new("invoice.paid", "t1", Value::Null))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_event_type_accepted() {
        let registry = HookRegistry::new();
        registry
            .emit(&Event::new("custom.thing", "t1", Value::Null))
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("custom.thing", "custom", counting(calls.clone()));
        assert!(!registry.is_valid_event_type("custom.thing"));
        registry
            .emit(&Event::new("custom.thing", "t1", Value::Null))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_async_runs_detached() {
        let registry = HookRegistry::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        registry.register(
            "tenant.created",
            "notify",
            handler_fn(move |event: Event, _cancel| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(event.tenant_id);
                    Ok::<(), Error>(())
                }
            }),
        );

        registry.emit_async(Event::of(EventType::TenantCreated, "t9", Value::Null));

        let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some("t9"));
    }

    #[tokio::test]
    async fn test_emit_async_deadline_cancels() {
        let registry = HookRegistry::with_deadline(Duration::from_millis(20));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        registry.register(
            "email.sent",
            "slow",
            handler_fn(move |_event, cancel: CancellationToken| {
                let tx = tx.clone();
                async move {
                    cancel.cancelled().await;
                    let _ = tx.send(());
                    Ok::<(), Error>(())
                }
            }),
        );
        registry.register("email.sent", "after", counting(calls.clone()));

        registry.emit_async(Event::of(EventType::EmailSent, "t1", Value::Null));

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
