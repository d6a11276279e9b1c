//! The dispatcher.
//!
//! Evaluates the compiled rules in declaration order against one message,
//! renders each match and hands it to the outgoing bot. Nothing here
//! returns an error: delivery problems are logged and collected in the
//! `DispatchReport`, and the next rule or destination carries on.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::bots::BotRegistry;
use crate::dispatch::binding::{Destination, OutgoingBinding};
use crate::error::DispatchError;
use crate::rules::{CompiledRule, MatchResult, describe_match, render};

/// Sent back on the sandbox channel when no rule matches.
pub const NO_MATCH_NOTICE: &str = "No rule matched this message.";

/// How long one send may take before it is abandoned and logged.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(20);

/// What happened to one inbound message.
#[derive(Debug, Default, Clone)]
pub struct DispatchReport {
    /// Indices of the rules that matched, in evaluation order.
    pub matched_rules: Vec<usize>,
    /// Rendered output of each matched rule.
    pub rendered: Vec<String>,
    /// Successful deliveries.
    pub delivered: Vec<(Destination, String)>,
    /// Delivery failures, already logged.
    pub errors: Vec<DispatchError>,
}

impl DispatchReport {
    pub fn is_match(&self) -> bool {
        !self.matched_rules.is_empty()
    }
}

/// Match-and-dispatch engine. Read-only after construction.
pub struct Dispatcher {
    rules: Vec<CompiledRule>,
    binding: OutgoingBinding,
    registry: Arc<dyn BotRegistry>,
    continue_on_match: bool,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        rules: Vec<CompiledRule>,
        binding: OutgoingBinding,
        registry: Arc<dyn BotRegistry>,
        continue_on_match: bool,
    ) -> Self {
        Self {
            rules,
            binding,
            registry,
            continue_on_match,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Rules matching `text`, in order; stops at the first one unless
    /// `continue_on_match` is set.
    fn matching_rules<'a>(&'a self, text: &str) -> Vec<(&'a CompiledRule, MatchResult)> {
        let mut found = Vec::new();
        for rule in &self.rules {
            let Some(result) = rule.evaluate(text) else {
                continue;
            };
            found.push((rule, result));
            if !self.continue_on_match {
                break;
            }
        }
        found
    }

    /// Production path: deliver each rendered match to every destination.
    pub async fn handle_incoming(&self, text: &str) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (rule, result) in self.matching_rules(text) {
            let output = render(&rule.template, &result, text);
            info!(rule = rule.index, output = %output, "Rule matched");
            report.matched_rules.push(rule.index);
            report.rendered.push(output.clone());
            self.deliver(&output, &mut report).await;
        }

        if !report.is_match() {
            debug!("No rule matched");
        }
        report
    }

    /// Send `output` to every destination through the bound bot.
    async fn deliver(&self, output: &str, report: &mut DispatchReport) {
        let Some(bot) = self
            .registry
            .find(self.binding.platform, &self.binding.self_id)
        else {
            let err = DispatchError::BotUnavailable {
                platform: self.binding.platform.to_string(),
                self_id: self.binding.self_id.clone(),
                available: self.registry.available(),
            };
            error!("{err}");
            report.errors.push(err);
            return;
        };

        for destination in &self.binding.destinations {
            let sent =
                tokio::time::timeout(self.send_timeout, bot.send_message(destination, output)).await;
            let reason = match sent {
                Ok(Ok(())) => {
                    report
                        .delivered
                        .push((destination.clone(), output.to_string()));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no answer within {:?}", self.send_timeout),
            };
            let err = DispatchError::SendFailed {
                destination: destination.to_string(),
                reason,
            };
            error!("{err}");
            report.errors.push(err);
        }
    }

    /// Sandbox path: the replies to post back on the originating channel.
    ///
    /// Each match renders its template followed by a dump of the captures.
    /// No match yields exactly one notice.
    pub fn handle_sandbox(&self, text: &str) -> Vec<String> {
        let replies: Vec<String> = self
            .matching_rules(text)
            .into_iter()
            .map(|(rule, result)| {
                let output = render(&rule.template, &result, text);
                debug!(rule = rule.index, "Sandbox match:\n{}", describe_match(&result));
                format!("{output}\n\nMatch result:\n{}", describe_match(&result))
            })
            .collect();

        if replies.is_empty() {
            return vec![NO_MATCH_NOTICE.to_string()];
        }
        replies
    }
}
