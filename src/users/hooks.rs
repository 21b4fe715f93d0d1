use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use super::model::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    AfterRegister,
    AfterRequestVerify,
    AfterVerify,
    AfterForgotPassword,
    AfterResetPassword,
    AfterUpdate,
    AfterDelete,
}

/// What happened, plus anything an observer needs to act on it
/// (e.g. the token to mail out).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookContext {
    Register,
    RequestVerify { token: String },
    Verify,
    ForgotPassword { token: String },
    ResetPassword,
    Update { changed: Vec<&'static str> },
    Delete,
}

impl HookContext {
    pub fn event(&self) -> HookEvent {
        match self {
            HookContext::Register => HookEvent::AfterRegister,
            HookContext::RequestVerify { .. } => HookEvent::AfterRequestVerify,
            HookContext::Verify => HookEvent::AfterVerify,
            HookContext::ForgotPassword { .. } => HookEvent::AfterForgotPassword,
            HookContext::ResetPassword => HookEvent::AfterResetPassword,
            HookContext::Update { .. } => HookEvent::AfterUpdate,
            HookContext::Delete => HookEvent::AfterDelete,
        }
    }
}

pub type Hook = Arc<dyn Fn(&User, &HookContext) -> anyhow::Result<()> + Send + Sync>;

/// A hook that returned an error. The operation that fired it still succeeded.
#[derive(Debug, Clone)]
pub struct HookWarning {
    pub event: HookEvent,
    pub user_id: Uuid,
    pub message: String,
}

/// Observer lists keyed by event, run in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    observers: HashMap<HookEvent, Vec<Hook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.observers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("Hooks").field("observers", &counts).finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, event: HookEvent, hook: F) -> Self
    where
        F: Fn(&User, &HookContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers.entry(event).or_default().push(Arc::new(hook));
        self
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.observers.get(&event).map_or(0, Vec::len)
    }

    pub(crate) fn fire(
        &self,
        user: &User,
        ctx: &HookContext,
        warnings: &broadcast::Sender<HookWarning>,
    ) {
        let event = ctx.event();
        let Some(observers) = self.observers.get(&event) else {
            return;
        };
        for hook in observers {
            if let Err(e) = hook(user, ctx) {
                warn!(event = ?event, user_id = %user.id, error = %e, "hook failed");
                // no subscribers is fine
                let _ = warnings.send(HookWarning {
                    event,
                    user_id: user.id,
                    message: format!("{e:#}"),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_user;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn observers_run_in_order_and_only_for_their_event() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, b) = (seen.clone(), seen.clone());
        let hooks = Hooks::new()
            .on(HookEvent::AfterRegister, move |_, _| {
                a.lock().unwrap().push("first");
                Ok(())
            })
            .on(HookEvent::AfterRegister, move |_, _| {
                b.lock().unwrap().push("second");
                Ok(())
            });
        let (tx, _rx) = broadcast::channel(4);
        let user = sample_user("h@example.com");

        hooks.fire(&user, &HookContext::Verify, &tx);
        assert!(seen.lock().unwrap().is_empty());

        hooks.fire(&user, &HookContext::Register, &tx);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn failing_hook_is_broadcast_and_does_not_stop_the_rest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = Hooks::new()
            .on(HookEvent::AfterDelete, |_, _| anyhow::bail!("mailer down"))
            .on(HookEvent::AfterDelete, move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let (tx, mut rx) = broadcast::channel(4);
        let user = sample_user("w@example.com");

        hooks.fire(&user, &HookContext::Delete, &tx);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let warning = rx.try_recv().expect("warning published");
        assert_eq!(warning.event, HookEvent::AfterDelete);
        assert_eq!(warning.user_id, user.id);
        assert!(warning.message.contains("mailer down"));
    }

    #[test]
    fn context_maps_to_event() {
        let ctx = HookContext::Update {
            changed: vec!["email"],
        };
        assert_eq!(ctx.event(), HookEvent::AfterUpdate);
        assert_eq!(
            HookContext::ForgotPassword { token: "t".into() }.event(),
            HookEvent::AfterForgotPassword
        );
    }
}
