//! Hook handler factory
//!
//! 플러그인이 선언한 `{event, handler}`를 호출 가능한 핸들러로 바꾸는 지점.
//! 플러그인 코드는 실행하지 않는다. 기본 구현은 디스패치를 로그로 남긴다.

use super::events::{Event, HookHandler};
use super::manifest::HookDeclaration;
use async_trait::async_trait;
use std::sync::Arc;
use tally_foundation::{PluginRecord, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub trait HookHandlerFactory: Send + Sync {
    /// 실패하면 플러그인 로드 실패로 처리된다
    fn create(&self, plugin: &PluginRecord, hook: &HookDeclaration)
        -> Result<Arc<dyn HookHandler>>;
}

/// 디스패치를 기록만 하는 기본 팩토리
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandlerFactory;

impl HookHandlerFactory for LoggingHandlerFactory {
    fn create(
        &self,
        plugin: &PluginRecord,
        hook: &HookDeclaration,
    ) -> Result<Arc<dyn HookHandler>> {
        Ok(Arc::new(LoggingHandler {
            plugin: plugin.name.clone(),
            handler: hook.handler.clone(),
        }))
    }
}

struct LoggingHandler {
    plugin: String,
    handler: String,
}

#[async_trait]
impl HookHandler for LoggingHandler {
    async fn handle(&self, event: &Event, _cancel: &CancellationToken) -> Result<()> {
        debug!(
            plugin = %self.plugin,
            handler = %self.handler,
            event_type = %event.event_type,
            tenant_id = %event.tenant_id,
            "Plugin hook dispatched"
        );
        Ok(())
    }
}
