//! Per-turn call budgets for costly tools.
//!
//! A [`BudgetGuard`] belongs to exactly one session. It counts retrieval
//! and web-search calls since the last [`BudgetGuard::reset_for_new_turn`]
//! and refuses once a counter reaches its ceiling. A refusal is an
//! ordinary value ([`Guarded::Refused`]) carrying a message meant for the
//! calling agent, never an error.
//!
//! Counters advance before the wrapped call runs and are not refunded when
//! it fails.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Which budget a guarded call draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    Retrieval,
    WebSearch,
}

impl GuardKind {
    /// The tool name the agent sees for this budget.
    pub fn tool_name(self) -> &'static str {
        match self {
            GuardKind::Retrieval => "retrieval_tool",
            GuardKind::WebSearch => "web_search",
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tool_name())
    }
}

/// Outcome of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guarded<T> {
    Allowed(T),
    Refused(String),
}

impl<T> Guarded<T> {
    pub fn is_refused(&self) -> bool {
        matches!(self, Guarded::Refused(_))
    }
}

#[derive(Debug, Default)]
struct Budget {
    limit: AtomicUsize,
    used: AtomicUsize,
}

impl Budget {
    /// Take one unit if any remain.
    fn try_take(&self) -> bool {
        let limit = self.limit.load(Ordering::SeqCst);
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < limit).then_some(used + 1)
            })
            .is_ok()
    }
}

#[derive(Debug, Default)]
pub struct BudgetGuard {
    retrieval: Budget,
    web_search: Budget,
}

impl BudgetGuard {
    pub fn new(max_retrieval_calls: i64, max_web_search_calls: i64) -> Self {
        let guard = Self::default();
        guard.configure(max_retrieval_calls, max_web_search_calls);
        guard
    }

    /// Set both ceilings. Negative values are clamped to zero.
    pub fn configure(&self, max_retrieval_calls: i64, max_web_search_calls: i64) {
        self.retrieval
            .limit
            .store(clamp(max_retrieval_calls), Ordering::SeqCst);
        self.web_search
            .limit
            .store(clamp(max_web_search_calls), Ordering::SeqCst);
    }

    /// Zero both counters. Call once per incoming user message.
    pub fn reset_for_new_turn(&self) {
        self.retrieval.used.store(0, Ordering::SeqCst);
        self.web_search.used.store(0, Ordering::SeqCst);
    }

    pub fn limit(&self, kind: GuardKind) -> usize {
        self.budget(kind).limit.load(Ordering::SeqCst)
    }

    pub fn used(&self, kind: GuardKind) -> usize {
        self.budget(kind).used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self, kind: GuardKind) -> usize {
        self.limit(kind).saturating_sub(self.used(kind))
    }

    /// Run `invoke` if `kind` has budget left this turn.
    ///
    /// When the budget is spent, `invoke` is not called and the counter is
    /// unchanged. Errors from `invoke` are returned untouched.
    pub async fn guard<T, E, F, Fut>(&self, kind: GuardKind, invoke: F) -> Result<Guarded<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.budget(kind).try_take() {
            return Ok(Guarded::Refused(limit_message(
                kind,
                self.used(kind),
                self.limit(kind),
            )));
        }
        invoke().await.map(Guarded::Allowed)
    }

    fn budget(&self, kind: GuardKind) -> &Budget {
        match kind {
            GuardKind::Retrieval => &self.retrieval,
            GuardKind::WebSearch => &self.web_search,
        }
    }
}

fn clamp(limit: i64) -> usize {
    usize::try_from(limit.max(0)).unwrap_or(usize::MAX)
}

/// Message returned to the agent when a budget is spent.
pub fn limit_message(kind: GuardKind, used: usize, limit: usize) -> String {
    format!(
        "⚠️ {} call limit reached for this user request ({}/{}). \
         Do not retry this tool again in this turn. \
         Ask the user for clarification, a narrower goal, or permission to continue.",
        kind, used, limit
    )
}

/// Suffix appended to a guarded tool's description.
pub fn guardrail_note(limit: usize) -> String {
    format!(
        "\n\n[Guardrail] This tool is budget-limited per user request. Maximum calls: {}.",
        limit
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn ok_call(calls: &AtomicUsize) -> Result<&'static str, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("result")
    }

    #[tokio::test]
    async fn refuses_after_ceiling() {
        let guard = BudgetGuard::new(2, 0);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let out = guard.guard(GuardKind::Retrieval, || ok_call(&calls)).await;
            assert_eq!(out, Ok(Guarded::Allowed("result")));
        }
        let out = guard
            .guard(GuardKind::Retrieval, || ok_call(&calls))
            .await
            .unwrap();
        assert!(out.is_refused());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(guard.used(GuardKind::Retrieval), 2);
    }

    #[test]
    fn limit_message_reports_usage_and_ceiling() {
        let msg = limit_message(GuardKind::WebSearch, 4, 3);
        assert!(msg.contains("web_search call limit reached"));
        assert!(msg.contains("(4/3)"));
    }

    #[tokio::test]
    async fn refusal_reports_calls_made() {
        let guard = BudgetGuard::new(3, 0);
        for _ in 0..3 {
            guard
                .guard(GuardKind::Retrieval, || async { Ok::<_, ()>(()) })
                .await
                .unwrap();
        }
        // Lowering the ceiling mid-turn leaves the counter above it.
        guard.configure(1, 0);
        let out = guard
            .guard(GuardKind::Retrieval, || async { Ok::<_, ()>(()) })
            .await
            .unwrap();
        match out {
            Guarded::Refused(msg) => assert!(msg.contains("(3/1)"), "{}", msg),
            Guarded::Allowed(_) => panic!("expected refusal"),
        }
    }

    #[tokio::test]
    async fn refusal_names_kind_and_limit() {
        let guard = BudgetGuard::new(0, 1);
        let out = guard
            .guard(GuardKind::Retrieval, || async { Ok::<_, ()>(()) })
            .await
            .unwrap();
        match out {
            Guarded::Refused(msg) => {
                assert!(msg.contains("retrieval_tool"));
                assert!(msg.contains("(0/0)"));
            }
            Guarded::Allowed(_) => panic!("expected refusal"),
        }
    }

    #[tokio::test]
    async fn kinds_are_independent() {
        let guard = BudgetGuard::new(1, 1);
        let r = guard
            .guard(GuardKind::Retrieval, || async { Ok::<_, ()>(1) })
            .await
            .unwrap();
        let w = guard
            .guard(GuardKind::WebSearch, || async { Ok::<_, ()>(2) })
            .await
            .unwrap();
        assert_eq!(r, Guarded::Allowed(1));
        assert_eq!(w, Guarded::Allowed(2));
        assert_eq!(guard.remaining(GuardKind::Retrieval), 0);
        assert_eq!(guard.remaining(GuardKind::WebSearch), 0);
    }

    #[tokio::test]
    async fn failed_call_consumes_budget_and_propagates() {
        let guard = BudgetGuard::new(1, 0);
        let out: Result<Guarded<()>, String> = guard
            .guard(GuardKind::Retrieval, || async { Err("boom".to_string()) })
            .await;
        assert_eq!(out, Err("boom".to_string()));
        assert_eq!(guard.remaining(GuardKind::Retrieval), 0);
    }

    #[test]
    fn negative_ceilings_clamp_to_zero() {
        let guard = BudgetGuard::new(-5, -1);
        assert_eq!(guard.limit(GuardKind::Retrieval), 0);
        assert_eq!(guard.limit(GuardKind::WebSearch), 0);
    }

    #[test]
    fn guardrail_note_names_ceiling() {
        assert!(guardrail_note(3).ends_with("Maximum calls: 3."));
    }

    proptest! {
        #[test]
        fn exactly_n_calls_run_per_turn(limit in 0i64..20, attempts in 0usize..40) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let guard = BudgetGuard::new(limit, limit);
                for _turn in 0..2 {
                    guard.reset_for_new_turn();
                    let calls = AtomicUsize::new(0);
                    let mut refused = 0usize;
                    for _ in 0..attempts {
                        let out = guard.guard(GuardKind::WebSearch, || ok_call(&calls)).await.unwrap();
                        if out.is_refused() {
                            refused += 1;
                        }
                    }
                    let expected = attempts.min(limit as usize);
                    prop_assert_eq!(calls.load(Ordering::SeqCst), expected);
                    prop_assert_eq!(refused, attempts - expected);
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
