//! Bounded polling for asynchronous readiness
//!
//! Every wait is an inline `tokio::time::sleep` awaited by the caller, so
//! once `poll` returns (ready, abandoned or dropped) nothing stays
//! scheduled on the timer wheel.

use crate::dom::{Document, ElementRef, NodeId, Tree};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// When a retry loop gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ceiling {
    /// Maximum number of probe evaluations
    Attempts(u32),
    /// Maximum elapsed time since the first probe
    Elapsed(Duration),
}

/// Fixed-interval retry with a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RetryPolicyRepr", into = "RetryPolicyRepr")]
pub struct RetryPolicy {
    pub interval: Duration,
    pub ceiling: Ceiling,
}

impl RetryPolicy {
    pub fn attempts(interval: Duration, max: u32) -> Self {
        Self {
            interval,
            ceiling: Ceiling::Attempts(max),
        }
    }

    pub fn elapsed(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            ceiling: Ceiling::Elapsed(max),
        }
    }

    /// Whether another attempt may be scheduled after `attempts` failures.
    fn exhausted(&self, attempts: u32, elapsed: Duration) -> bool {
        match self.ceiling {
            Ceiling::Attempts(max) => attempts >= max,
            Ceiling::Elapsed(max) => elapsed + self.interval >= max,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("retry interval must be non-zero".into());
        }
        match self.ceiling {
            Ceiling::Attempts(0) => Err("attempt ceiling must be at least 1".into()),
            Ceiling::Elapsed(max) if max.is_zero() => Err("elapsed ceiling must be non-zero".into()),
            _ => Ok(()),
        }
    }
}

/// Wire form: exactly one of `max_attempts` / `max_elapsed_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RetryPolicyRepr {
    interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_elapsed_ms: Option<u64>,
}

impl TryFrom<RetryPolicyRepr> for RetryPolicy {
    type Error = String;

    fn try_from(repr: RetryPolicyRepr) -> Result<Self, Self::Error> {
        let interval = Duration::from_millis(repr.interval_ms);
        match (repr.max_attempts, repr.max_elapsed_ms) {
            (Some(n), None) => Ok(Self::attempts(interval, n)),
            (None, Some(ms)) => Ok(Self::elapsed(interval, Duration::from_millis(ms))),
            _ => Err("retry policy needs exactly one of max_attempts or max_elapsed_ms".into()),
        }
    }
}

impl From<RetryPolicy> for RetryPolicyRepr {
    fn from(policy: RetryPolicy) -> Self {
        let (max_attempts, max_elapsed_ms) = match policy.ceiling {
            Ceiling::Attempts(n) => (Some(n), None),
            Ceiling::Elapsed(d) => (None, Some(d.as_millis() as u64)),
        };
        Self {
            interval_ms: policy.interval.as_millis() as u64,
            max_attempts,
            max_elapsed_ms,
        }
    }
}

/// Why a wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    /// The node left the document
    Disconnected,
    /// The policy's ceiling was reached
    CeilingReached,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::CeilingReached => write!(f, "ceiling reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned {
    pub reason: AbandonReason,
    /// Probe evaluations performed before giving up
    pub attempts: u32,
}

/// Result of `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    Abandoned(Abandoned),
}

/// Result of `wait_until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready { attempts: u32 },
    Abandoned(Abandoned),
}

/// Evaluate `probe` against `node` until it yields a value.
///
/// The first evaluation is immediate. A disconnected node abandons at once,
/// without evaluating the probe.
pub async fn poll<T>(
    document: &Document,
    node: NodeId,
    policy: &RetryPolicy,
    mut probe: impl FnMut(&Tree, NodeId) -> Option<T>,
) -> Polled<T> {
    let start = Instant::now();
    let mut attempts = 0;
    loop {
        let outcome = document.read(|tree| {
            if !tree.is_connected(node) {
                return Err(AbandonReason::Disconnected);
            }
            Ok(probe(tree, node))
        });
        let reason = match outcome {
            Ok(Some(value)) => return Polled::Ready(value),
            Ok(None) => {
                attempts += 1;
                if policy.exhausted(attempts, start.elapsed()) {
                    Some(AbandonReason::CeilingReached)
                } else {
                    None
                }
            }
            Err(reason) => Some(reason),
        };
        if let Some(reason) = reason {
            tracing::debug!(%node, %reason, attempts, "wait abandoned");
            return Polled::Abandoned(Abandoned { reason, attempts });
        }
        tokio::time::sleep(policy.interval).await;
    }
}

/// Wait until `predicate` holds for `node`.
pub async fn wait_until(
    document: &Document,
    node: NodeId,
    policy: &RetryPolicy,
    mut predicate: impl FnMut(&ElementRef<'_>) -> bool,
) -> WaitOutcome {
    let mut attempts = 0;
    let polled = poll(document, node, policy, |tree, node| {
        attempts += 1;
        let el = tree.element(node)?;
        predicate(&el).then_some(())
    })
    .await;
    match polled {
        Polled::Ready(()) => WaitOutcome::Ready { attempts },
        Polled::Abandoned(abandoned) => WaitOutcome::Abandoned(abandoned),
    }
}

/// Readiness predicate: enough rendered text and at least one child element.
pub fn is_ready(el: &ElementRef<'_>, min_text_chars: usize) -> bool {
    el.child_element_count() > 0 && el.text_content().trim().chars().count() >= min_text_chars
}

/// Wait until `node` satisfies the readiness predicate.
pub async fn wait_until_ready(
    document: &Document,
    node: NodeId,
    min_text_chars: usize,
    policy: &RetryPolicy,
) -> WaitOutcome {
    wait_until(document, node, policy, |el| is_ready(el, min_text_chars)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::El;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_abandons_after_exact_attempts() {
        let doc = Document::new("about:blank");
        let node = doc.append(doc.body(), El::new("div")).unwrap();
        let mut calls = 0;
        let start = Instant::now();

        let outcome = wait_until(&doc, node, &RetryPolicy::attempts(ms(100), 3), |_| {
            calls += 1;
            false
        })
        .await;

        assert_eq!(
            outcome,
            WaitOutcome::Abandoned(Abandoned {
                reason: AbandonReason::CeilingReached,
                attempts: 3,
            })
        );
        assert_eq!(calls, 3);
        // Two sleeps between three attempts, none after the last
        assert_eq!(start.elapsed(), ms(200));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_later_attempt() {
        let doc = Document::new("about:blank");
        let node = doc.append(doc.body(), El::new("div")).unwrap();
        let mut calls = 0;

        let outcome = wait_until(&doc, node, &RetryPolicy::attempts(ms(50), 10), |_| {
            calls += 1;
            calls == 4
        })
        .await;

        assert_eq!(outcome, WaitOutcome::Ready { attempts: 4 });
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_node_abandons_immediately() {
        let doc = Document::new("about:blank");
        let node = doc.build(El::new("div"));
        let mut calls = 0;

        let outcome = poll(&doc, node, &RetryPolicy::attempts(ms(100), 5), |_, _| {
            calls += 1;
            Some(())
        })
        .await;

        assert_eq!(
            outcome,
            Polled::Abandoned(Abandoned {
                reason: AbandonReason::Disconnected,
                attempts: 0,
            })
        );
        assert_eq!(calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn removal_mid_wait_abandons() {
        let doc = std::sync::Arc::new(Document::new("about:blank"));
        let node = doc.append(doc.body(), El::new("div")).unwrap();
        let remover = doc.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(250)).await;
            remover.remove(node).unwrap();
        });

        let outcome = wait_until(&doc, node, &RetryPolicy::attempts(ms(100), 50), |_| false).await;

        match outcome {
            WaitOutcome::Abandoned(a) => {
                assert_eq!(a.reason, AbandonReason::Disconnected);
                assert_eq!(a.attempts, 3);
            }
            other => panic!("expected abandonment, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_ceiling_bounds_attempts() {
        let doc = Document::new("about:blank");
        let node = doc.append(doc.body(), El::new("div")).unwrap();
        let start = Instant::now();

        let outcome = poll::<()>(&doc, node, &RetryPolicy::elapsed(ms(100), ms(1000)), |_, _| None).await;

        match outcome {
            Polled::Abandoned(a) => {
                assert_eq!(a.reason, AbandonReason::CeilingReached);
                assert_eq!(a.attempts, 10);
            }
            other => panic!("expected abandonment, got {:?}", other),
        }
        assert_eq!(start.elapsed(), ms(900));
    }

    #[test]
    fn readiness_needs_text_and_structure() {
        let doc = Document::new("about:blank");
        let bare = doc.append(doc.body(), El::new("div").text("plenty of text here")).unwrap();
        let short = doc
            .append(doc.body(), El::new("div").child(El::new("p").text("hi")))
            .unwrap();
        let ready = doc
            .append(doc.body(), El::new("div").child(El::new("p").text("plenty of text here")))
            .unwrap();

        doc.read(|tree| {
            assert!(!is_ready(&tree.element(bare).unwrap(), 10));
            assert!(!is_ready(&tree.element(short).unwrap(), 10));
            assert!(is_ready(&tree.element(ready).unwrap(), 10));
        });
    }

    #[test]
    fn policy_wire_form_requires_one_ceiling() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"interval_ms": 100, "max_attempts": 3}"#).unwrap();
        assert_eq!(policy, RetryPolicy::attempts(ms(100), 3));

        let err = serde_json::from_str::<RetryPolicy>(
            r#"{"interval_ms": 100, "max_attempts": 3, "max_elapsed_ms": 10}"#,
        );
        assert!(err.is_err());
    }
}
