//! Live selector repair
//!
//! Replays each scenario against an [`AutomationSession`], swapping element
//! targets for selectors the backend confirms against the live page. Never
//! fails: every error is absorbed at one of three tiers and the original
//! value is kept in its place.
//!
//! - session: backend unreachable, every scenario passes through unchanged
//! - scenario: connection lost or a panic mid-scenario, the original
//!   scenario is kept
//! - step: validation or execution failed, the original step is kept

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use testforge_common::{Action, Outcome, Scenario, Step};

use crate::config::RepairConfig;
use crate::session::{AutomationSession, SessionError};

/// Repair result for one scenario
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRepair {
    pub outcome: Outcome<Scenario>,
    /// Per-step outcomes; empty when the scenario tier gave up
    pub steps: Vec<Outcome<Step>>,
    /// Steps whose target was replaced
    pub improved_steps: usize,
    pub duration_ms: u64,
}

impl ScenarioRepair {
    fn repaired(original: &Scenario, steps: Vec<Outcome<Step>>, elapsed: Duration) -> Self {
        let improved_steps = original
            .steps
            .iter()
            .zip(&steps)
            .filter(|(before, after)| after.is_ok() && after.value().target != before.target)
            .count();

        let mut scenario =
            original.with_replaced_steps(steps.iter().map(|o| o.value().clone()).collect());
        scenario.time_taken_to_compile = Some(format!("{:.2}s", elapsed.as_secs_f64()));

        Self {
            outcome: Outcome::ok(scenario),
            steps,
            improved_steps,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn degraded(original: &Scenario, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            outcome: Outcome::degraded(original.clone(), reason),
            steps: Vec::new(),
            improved_steps: 0,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        self.outcome.value()
    }

    pub fn degraded_steps(&self) -> usize {
        self.steps.iter().filter(|o| o.is_degraded()).count()
    }
}

/// Result of one `repair` call, one entry per input scenario in input order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub connected: bool,
    pub scenarios: Vec<ScenarioRepair>,
}

impl RepairReport {
    fn passthrough(scenarios: &[Scenario], reason: &str) -> Self {
        Self {
            connected: false,
            scenarios: scenarios
                .iter()
                .map(|s| ScenarioRepair::degraded(s, reason, Duration::ZERO))
                .collect(),
        }
    }

    fn timed_out(scenarios: &[Scenario], limit: Duration) -> Self {
        Self {
            connected: true,
            scenarios: scenarios
                .iter()
                .map(|s| ScenarioRepair::degraded(s, format!("repair exceeded {:?}", limit), limit))
                .collect(),
        }
    }

    /// Repaired (or original) scenarios
    pub fn into_scenarios(self) -> Vec<Scenario> {
        self.scenarios
            .into_iter()
            .map(|r| r.outcome.into_value())
            .collect()
    }

    /// Backend was reachable and no scenario had to be abandoned
    pub fn validation_succeeded(&self) -> bool {
        self.connected && self.degraded_scenarios() == 0
    }

    pub fn improved_steps(&self) -> usize {
        self.scenarios.iter().map(|r| r.improved_steps).sum()
    }

    pub fn degraded_steps(&self) -> usize {
        self.scenarios.iter().map(ScenarioRepair::degraded_steps).sum()
    }

    pub fn degraded_scenarios(&self) -> usize {
        self.scenarios.iter().filter(|r| r.outcome.is_degraded()).count()
    }
}

/// Accumulator threaded through a scenario's steps
struct StepCursor<'s> {
    session: &'s mut AutomationSession,
    outcomes: Vec<Outcome<Step>>,
}

/// Drives an automation session across scenarios
#[derive(Debug, Clone)]
pub struct SelectorRepairer {
    step_delay: Duration,
}

impl SelectorRepairer {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }

    pub fn from_config(config: &RepairConfig) -> Self {
        Self::new(config.step_delay())
    }

    /// Repair `scenarios` against `url`. Disconnects the session before
    /// returning, whatever happened.
    pub async fn repair(
        &self,
        session: &mut AutomationSession,
        url: &str,
        scenarios: &[Scenario],
    ) -> RepairReport {
        if !session.connect().await {
            session.disconnect().await;
            warn!("Selector repair skipped: automation backend unavailable");
            return RepairReport::passthrough(scenarios, "automation backend unavailable");
        }

        let mut results = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            let start = Instant::now();
            let attempt = AssertUnwindSafe(self.repair_scenario(session, url, scenario))
                .catch_unwind()
                .await;

            let result = match attempt {
                Ok(Ok(steps)) => ScenarioRepair::repaired(scenario, steps, start.elapsed()),
                Ok(Err(e)) => {
                    warn!("Keeping original scenario {}: {}", scenario.id, e);
                    ScenarioRepair::degraded(scenario, e.to_string(), start.elapsed())
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    warn!("Keeping original scenario {}: panicked: {}", scenario.id, reason);
                    ScenarioRepair::degraded(scenario, format!("panicked: {}", reason), start.elapsed())
                }
            };

            debug!(
                "Scenario {}: {} improved, {} degraded step(s)",
                scenario.id,
                result.improved_steps,
                result.degraded_steps()
            );
            results.push(result);
        }

        session.disconnect().await;

        let report = RepairReport {
            connected: true,
            scenarios: results,
        };
        info!(
            "Selector repair finished: {} scenario(s), {} improved step(s), {} degraded step(s), {} degraded scenario(s)",
            report.scenarios.len(),
            report.improved_steps(),
            report.degraded_steps(),
            report.degraded_scenarios()
        );
        report
    }

    /// [`repair`](Self::repair) bounded by `limit`. On expiry the session is
    /// still disconnected and every scenario passes through unchanged.
    pub async fn repair_within(
        &self,
        session: &mut AutomationSession,
        url: &str,
        scenarios: &[Scenario],
        limit: Option<Duration>,
    ) -> RepairReport {
        let Some(limit) = limit else {
            return self.repair(session, url, scenarios).await;
        };

        match tokio::time::timeout(limit, self.repair(session, url, scenarios)).await {
            Ok(report) => report,
            Err(_) => {
                warn!("Selector repair exceeded {:?}, keeping original scenarios", limit);
                session.disconnect().await;
                RepairReport::timed_out(scenarios, limit)
            }
        }
    }

    /// Fold over the steps in order. A lost connection aborts the fold.
    async fn repair_scenario(
        &self,
        session: &mut AutomationSession,
        url: &str,
        scenario: &Scenario,
    ) -> Result<Vec<Outcome<Step>>, SessionError> {
        let cursor = StepCursor {
            session,
            outcomes: Vec::with_capacity(scenario.steps.len()),
        };

        let cursor = stream::iter(scenario.steps.iter().enumerate())
            .map(Ok::<_, SessionError>)
            .try_fold(cursor, |mut cursor, (index, step)| async move {
                if index > 0 && !self.step_delay.is_zero() {
                    tokio::time::sleep(self.step_delay).await;
                }
                let outcome = self.repair_step(cursor.session, url, index, step).await?;
                cursor.outcomes.push(outcome);
                Ok(cursor)
            })
            .await?;

        Ok(cursor.outcomes)
    }

    async fn repair_step(
        &self,
        session: &mut AutomationSession,
        url: &str,
        index: usize,
        step: &Step,
    ) -> Result<Outcome<Step>, SessionError> {
        match &step.action {
            Action::Other(name) => Ok(Outcome::degraded(
                step.clone(),
                format!("unrecognized action: {}", name),
            )),
            Action::Goto => {
                // The scenario's first navigation always goes to the run URL
                let destination = if index == 0 { url } else { step.target.as_str() };
                let result = session.execute_step(&Action::Goto, destination, None).await?;
                Ok(if result.success {
                    Outcome::ok(
                        step.clone()
                            .with_description(format!("{} [navigation verified]", step.description)),
                    )
                } else {
                    Outcome::degraded(step.clone(), failure_reason(result.error, "navigation failed"))
                })
            }
            Action::Wait if step.targets_root() => {
                let result = session
                    .execute_step(&step.action, &step.target, step.data.as_deref())
                    .await?;
                Ok(if result.success {
                    Outcome::ok(step.clone())
                } else {
                    Outcome::degraded(step.clone(), failure_reason(result.error, "wait failed"))
                })
            }
            _ => self.repair_element_step(session, step).await,
        }
    }

    async fn repair_element_step(
        &self,
        session: &mut AutomationSession,
        step: &Step,
    ) -> Result<Outcome<Step>, SessionError> {
        let validation = session.validate_selector(&step.target).await?;

        let candidate = if validation.success {
            validation
                .improved_selector
                .clone()
                .unwrap_or_else(|| step.target.clone())
        } else {
            step.target.clone()
        };

        // Execute even after a failed validation so the page keeps up with
        // the scenario for the steps that follow
        let result = session
            .execute_step(&step.action, &candidate, step.data.as_deref())
            .await?;

        if !validation.success {
            return Ok(Outcome::degraded(
                step.clone(),
                failure_reason(validation.error, "selector validation failed"),
            ));
        }
        if !result.success {
            return Ok(Outcome::degraded(
                step.clone(),
                failure_reason(result.error, "step execution failed"),
            ));
        }

        if candidate != step.target {
            debug!("Replaced selector {} with {}", step.target, candidate);
        }
        let description = format!("{} [validated selector: {}]", step.description, candidate);
        Ok(Outcome::ok(step.retarget(candidate).with_description(description)))
    }
}

impl Default for SelectorRepairer {
    fn default() -> Self {
        Self::from_config(&RepairConfig::default())
    }
}

fn failure_reason(error: Option<String>, fallback: &str) -> String {
    error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolMap;
    use crate::error::{ForgeError, ForgeResult};
    use crate::session::testing::ScriptedBackend;
    use crate::session::{AutomationBackend, SessionState, ToolReply};
    use async_trait::async_trait;
    use serde_json::Value;

    const VALIDATE: &str = "validate_selector";

    fn repairer() -> SelectorRepairer {
        SelectorRepairer::new(Duration::ZERO)
    }

    fn login() -> Scenario {
        Scenario::new("login", "Login").with_steps(vec![
            Step::new(Action::Goto, "https://placeholder.test"),
            Step::new(Action::Fill, "#user").with_data("bob"),
            Step::new(Action::Click, "#login").with_description("Submit"),
            Step::new(Action::Wait, "body"),
        ])
    }

    #[tokio::test]
    async fn test_unreachable_backend_passes_through() {
        let backend = ScriptedBackend::refusing();
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let input = vec![login(), Scenario::new("empty", "Empty")];
        let report = repairer().repair(&mut session, "https://x.test", &input).await;

        assert!(!report.validation_succeeded());
        assert_eq!(report.degraded_scenarios(), 2);
        assert_eq!(report.into_scenarios(), input);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let backend = ScriptedBackend::new();
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let report = repairer().repair(&mut session, "https://x.test", &[]).await;
        assert!(report.validation_succeeded());
        assert!(report.into_scenarios().is_empty());
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_step_tier() {
        let backend = ScriptedBackend::new()
            .reply(
                VALIDATE,
                "#login",
                Ok(ToolReply::ok(r#"{"success": true, "improvedSelector": "[data-testid=login]"}"#)),
            )
            .reply(VALIDATE, "#user", Ok(ToolReply::error("not found")));
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let original = login();
        let report = repairer()
            .repair(&mut session, "https://x.test/login", &[original.clone()])
            .await;
        assert!(report.validation_succeeded());
        assert_eq!(report.improved_steps(), 1);
        assert_eq!(report.degraded_steps(), 1);

        let repaired = report.into_scenarios().remove(0);
        assert_eq!(repaired.steps.len(), 4);
        assert!(repaired.time_taken_to_compile.as_deref().unwrap().ends_with('s'));

        // goto: target untouched, description marks the navigation
        assert_eq!(repaired.steps[0].target, "https://placeholder.test");
        assert_eq!(
            repaired.steps[0].description,
            "goto https://placeholder.test [navigation verified]"
        );
        // fill: validation failed, original kept
        assert_eq!(repaired.steps[1], original.steps[1]);
        // click: improved selector adopted
        assert_eq!(repaired.steps[2].target, "[data-testid=login]");
        assert_eq!(
            repaired.steps[2].description,
            "Submit [validated selector: [data-testid=login]]"
        );
        // wait on the root selector
        assert_eq!(repaired.steps[3], original.steps[3]);

        let log = log.lock().unwrap();
        let calls: Vec<(&str, String)> = log
            .calls
            .iter()
            .map(|(tool, args)| {
                let key = args["url"].as_str().or(args["selector"].as_str()).unwrap_or_default();
                (tool.as_str(), key.to_string())
            })
            .collect();
        assert_eq!(
            calls,
            vec![
                ("navigate", "https://x.test/login".to_string()),
                (VALIDATE, "#user".to_string()),
                ("fill", "#user".to_string()),
                (VALIDATE, "#login".to_string()),
                ("click", "[data-testid=login]".to_string()),
                ("wait_for_selector", "body".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_later_goto_uses_own_target() {
        let backend = ScriptedBackend::new();
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let scenario = Scenario::new("nav", "Nav").with_steps(vec![
            Step::new(Action::Click, "#menu"),
            Step::new(Action::Goto, "https://x.test/about"),
        ]);
        repairer().repair(&mut session, "https://x.test", &[scenario]).await;

        let log = log.lock().unwrap();
        let navigate = log
            .calls
            .iter()
            .find(|(tool, _)| tool == "navigate")
            .unwrap();
        assert_eq!(navigate.1["url"], "https://x.test/about");
    }

    #[tokio::test]
    async fn test_unrecognized_action_kept() {
        let backend = ScriptedBackend::new();
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let scenario = Scenario::new("s", "S")
            .with_steps(vec![Step::new(Action::parse("scroll"), "#feed")]);
        let report = repairer().repair(&mut session, "https://x.test", &[scenario.clone()]).await;

        assert_eq!(report.degraded_steps(), 1);
        assert_eq!(report.into_scenarios()[0].steps, scenario.steps);
        assert!(log.lock().unwrap().calls.is_empty());
    }

    #[tokio::test]
    async fn test_lost_connection_keeps_remaining_scenarios() {
        let backend = ScriptedBackend::new().reply(
            VALIDATE,
            "#user",
            Err(ForgeError::Connection("server exited".to_string())),
        );
        let log = backend.log();
        let mut session = AutomationSession::new(Box::new(backend), ToolMap::selector_server());

        let first = login();
        let second = Scenario::new("second", "Second")
            .with_steps(vec![Step::new(Action::Click, "#other")]);
        let report = repairer()
            .repair(&mut session, "https://x.test", &[first.clone(), second.clone()])
            .await;

        assert!(!report.validation_succeeded());
        assert_eq!(report.degraded_scenarios(), 2);
        assert!(report.scenarios[0]
            .outcome
            .reason()
            .unwrap()
            .contains("server exited"));
        assert_eq!(report.into_scenarios(), vec![first, second]);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    /// Backend that panics on any call
    struct PanickingBackend;

    #[async_trait]
    impl AutomationBackend for PanickingBackend {
        async fn connect(&mut self) -> ForgeResult<()> {
            Ok(())
        }

        async fn call_tool(&mut self, _name: &str, _arguments: Value) -> ForgeResult<ToolReply> {
            panic!("backend bug");
        }

        async fn close(&mut self) {}
    }

    #[tokio::test]
    async fn test_panic_keeps_original_scenario() {
        let mut session = AutomationSession::new(Box::new(PanickingBackend), ToolMap::selector_server());
        let input = vec![login()];
        let report = repairer().repair(&mut session, "https://x.test", &input).await;

        assert_eq!(report.degraded_scenarios(), 1);
        assert!(report.scenarios[0].outcome.reason().unwrap().contains("backend bug"));
        assert_eq!(report.into_scenarios(), input);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_failure_reason() {
        assert_eq!(failure_reason(Some("boom".into()), "x"), "boom");
        assert_eq!(failure_reason(Some("  ".into()), "x"), "x");
        assert_eq!(failure_reason(None, "x"), "x");
    }
}
