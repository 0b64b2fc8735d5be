//! Declarative JSON scenarios.
//!
//! ```json
//! {
//!   "name": "the-internet smoke",
//!   "base_url": "https://the-internet.test",
//!   "tests": [
//!     {
//!       "name": "checkbox toggle",
//!       "steps": [
//!         { "action": "navigate", "url": "/checkboxes" },
//!         { "action": "click", "selector": "#checkbox1" },
//!         { "action": "assert_checked", "selector": "#checkbox1", "checked": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::harness::{HarnessError, HarnessResult, TestCx, TestFailure, TestOutcome};
use crate::runner::TestCase;

/// One declarative test step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
        #[serde(default)]
        description: Option<String>,
    },
    Click {
        selector: String,
        #[serde(default)]
        description: Option<String>,
    },
    Fill {
        selector: String,
        value: String,
        #[serde(default)]
        description: Option<String>,
    },
    WaitFor {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Wait {
        millis: u64,
        #[serde(default)]
        reason: Option<String>,
    },
    AssertVisible {
        selector: String,
        #[serde(default)]
        description: Option<String>,
    },
    AssertText {
        selector: String,
        contains: String,
    },
    AssertChecked {
        selector: String,
        checked: bool,
    },
    AssertUrl {
        contains: String,
    },
    AssertTitle {
        equals: String,
    },
    Screenshot {
        name: String,
    },
    Baseline {
        name: String,
    },
    /// Group of actions reported as one step with screenshots
    Step {
        name: String,
        steps: Vec<Action>,
    },
}

impl Action {
    pub fn apply(&self, cx: &mut TestCx<'_>) -> TestOutcome {
        match self {
            Action::Navigate { url, description } => cx.navigate_to(url, description.as_deref().unwrap_or(url)),
            Action::Click { selector, description } => {
                cx.click_element(selector, description.as_deref().unwrap_or(selector))
            }
            Action::Fill { selector, value, description } => {
                cx.fill_field(selector, value, description.as_deref().unwrap_or(selector))
            }
            Action::WaitFor { selector, timeout_ms } => {
                cx.page().wait_for(selector, timeout_ms.map(Duration::from_millis))?;
                Ok(())
            }
            Action::Wait { millis, reason } => cx.wait_for_timeout(*millis, reason.as_deref().unwrap_or("pause")),
            Action::AssertVisible { selector, description } => {
                cx.assert_visible(selector, description.as_deref().unwrap_or(selector))
            }
            Action::AssertText { selector, contains } => cx.assert_text(selector, contains),
            Action::AssertChecked { selector, checked } => {
                let actual = cx.is_checked(selector)?;
                if actual != *checked {
                    return Err(TestFailure::assertion(format!(
                        "'{selector}' should be {}checked",
                        if *checked { "" } else { "un" }
                    )));
                }
                Ok(())
            }
            Action::AssertUrl { contains } => {
                let url = cx.page().url()?;
                if !url.contains(contains.as_str()) {
                    return Err(TestFailure::assertion(format!("URL {url:?} should contain {contains:?}")));
                }
                Ok(())
            }
            Action::AssertTitle { equals } => {
                let title = cx.page().title()?;
                if &title != equals {
                    return Err(TestFailure::assertion(format!("title should be {equals:?}, was {title:?}")));
                }
                Ok(())
            }
            Action::Screenshot { name } => {
                cx.save_screenshot(name);
                Ok(())
            }
            Action::Baseline { name } => cx.assert_matches_baseline(name),
            Action::Step { name, steps } => cx.step(name, |cx| steps.iter().try_for_each(|a| a.apply(cx))),
        }
    }

    fn resolve_urls(&mut self, base_url: Option<&str>) -> Result<(), String> {
        match self {
            Action::Navigate { url, .. } if url.starts_with('/') => match base_url {
                Some(base) => {
                    *url = format!("{}{}", base.trim_end_matches('/'), url);
                    Ok(())
                }
                None => Err(format!("relative URL '{url}' needs a base_url")),
            },
            Action::Step { steps, .. } => steps.iter_mut().try_for_each(|a| a.resolve_urls(base_url)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTest {
    pub name: String,
    pub steps: Vec<Action>,
}

/// A named list of tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    /// Prefix for navigate URLs starting with `/`
    #[serde(default)]
    pub base_url: Option<String>,
    pub tests: Vec<ScenarioTest>,
}

impl Scenario {
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> HarnessResult<Self> {
        let mut scenario: Scenario = serde_json::from_str(text)?;
        if scenario.tests.is_empty() {
            return Err(HarnessError::Scenario("no tests defined".to_string()));
        }
        let base_url = scenario.base_url.clone();
        for test in &mut scenario.tests {
            if test.name.trim().is_empty() {
                return Err(HarnessError::Scenario("test without a name".to_string()));
            }
            for action in &mut test.steps {
                action
                    .resolve_urls(base_url.as_deref())
                    .map_err(|e| HarnessError::Scenario(format!("{}: {e}", test.name)))?;
            }
        }
        Ok(scenario)
    }

    pub fn into_cases(self) -> Vec<TestCase> {
        self.tests
            .into_iter()
            .map(|test| {
                let steps = test.steps;
                TestCase::new(test.name, move |cx| steps.iter().try_for_each(|a| a.apply(cx)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_resolves_relative_urls() {
        let scenario = Scenario::parse(
            r##"{
                "base_url": "https://the-internet.test/",
                "tests": [{
                    "name": "login",
                    "steps": [
                        { "action": "navigate", "url": "/login" },
                        { "action": "fill", "selector": "#username", "value": "tomsmith" },
                        { "action": "step", "name": "submit", "steps": [
                            { "action": "navigate", "url": "/secure" }
                        ]}
                    ]
                }]
            }"##,
        )
        .unwrap();
        let steps = &scenario.tests[0].steps;
        assert_eq!(
            steps[0],
            Action::Navigate {
                url: "https://the-internet.test/login".to_string(),
                description: None
            }
        );
        let Action::Step { steps: nested, .. } = &steps[2] else {
            panic!("expected a step group");
        };
        assert_eq!(
            nested[0],
            Action::Navigate {
                url: "https://the-internet.test/secure".to_string(),
                description: None
            }
        );
    }

    #[test]
    fn test_parse_rejects_invalid_scenarios() {
        assert!(matches!(Scenario::parse(r#"{ "tests": [] }"#), Err(HarnessError::Scenario(_))));
        assert!(matches!(
            Scenario::parse(r#"{ "tests": [{ "name": "x", "steps": [{ "action": "navigate", "url": "/a" }] }] }"#),
            Err(HarnessError::Scenario(msg)) if msg.contains("base_url")
        ));
        assert!(matches!(
            Scenario::parse(r#"{ "tests": [{ "name": "x", "steps": [{ "action": "teleport" }] }] }"#),
            Err(HarnessError::Serialization(_))
        ));
    }

    #[test]
    fn test_into_cases_keeps_order() {
        let scenario = Scenario::parse(
            r#"{ "tests": [
                { "name": "first", "steps": [] },
                { "name": "second", "steps": [{ "action": "wait", "millis": 1 }] }
            ] }"#,
        )
        .unwrap();
        let names: Vec<String> = scenario.into_cases().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
    }
}
