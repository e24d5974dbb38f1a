//! Hierarchical access-control engine.
//!
//! Evaluates a request `(client_ip, geo, asn, target)` against a rule set
//! in two passes: `system`-scoped rules first, then rules scoped to the
//! specific target. First match (by priority, ties broken by insertion
//! order) wins within each pass.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::dns::metrics::MetricsCollector;

/// Where a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    System,
    Master,
    Slave,
    Cache,
    Webui,
    Doh,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::System => "system",
            Target::Master => "master",
            Target::Slave => "slave",
            Target::Cache => "cache",
            Target::Webui => "webui",
            Target::Doh => "doh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Ip(IpAddr),
    Network(IpNetwork),
    /// Two-letter ISO-3166 country code.
    Country(String),
    Asn(u32),
}

impl MatchKind {
    fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            MatchKind::Ip(ip) => *ip == ctx.client_ip,
            MatchKind::Network(net) => net.contains(ctx.client_ip),
            MatchKind::Country(code) => ctx
                .country
                .as_deref()
                .map(|c| c.eq_ignore_ascii_case(code))
                .unwrap_or(false),
            MatchKind::Asn(asn) => ctx.asn == Some(*asn),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Allow,
    Deny,
}

/// A single ACL entry. `id` is stable and returned with every decision so
/// callers can attribute a statistics bump to the rule that fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: u64,
    pub target: Target,
    pub match_kind: MatchKind,
    pub action: Action,
    /// Lower sorts first. Ties break by `id` (insertion order).
    pub priority: i32,
    pub enabled: bool,
    pub zone: Option<String>,
    /// Present on UPDATE-scoped rules only.
    pub required_tsig_key: Option<String>,
    pub allow_add: bool,
    pub allow_delete: bool,
    pub allow_update: bool,
}

impl Rule {
    pub fn new(id: u64, target: Target, match_kind: MatchKind, action: Action, priority: i32) -> Self {
        Rule {
            id,
            target,
            match_kind,
            action,
            priority,
            enabled: true,
            zone: None,
            required_tsig_key: None,
            allow_add: true,
            allow_delete: true,
            allow_update: true,
        }
    }
}

/// Everything the evaluator needs to know about the requester.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_ip: IpAddr,
    pub country: Option<String>,
    pub asn: Option<u32>,
    pub target: Target,
    /// Set only for UPDATE requests: the TSIG key name that verified, if any.
    pub presented_tsig_key: Option<String>,
    pub operation: Option<UpdateOperation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOperation {
    Add,
    Delete,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow { matched_rule: Option<u64> },
    Deny { matched_rule: Option<u64> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn matched_rule(&self) -> Option<u64> {
        match self {
            Decision::Allow { matched_rule } | Decision::Deny { matched_rule } => *matched_rule,
        }
    }
}

/// Evaluates the hierarchical ACL described in §4.4: `(rules, client_ip,
/// geo, asn, target)` is a pure function — identical inputs always yield
/// the identical decision.
#[derive(Debug, Default, Clone)]
pub struct AclEngine {
    rules: Vec<Rule>,
}

impl AclEngine {
    pub fn new() -> Self {
        AclEngine { rules: Vec::new() }
    }

    pub fn with_rules(rules: Vec<Rule>) -> Self {
        AclEngine { rules }
    }

    pub fn add_rule(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    fn sorted_for(&self, target: Target) -> Vec<&Rule> {
        let mut matching: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.target == target)
            .collect();
        matching.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        matching
    }

    /// Evaluate an ordinary (non-UPDATE) request.
    pub fn evaluate(&self, ctx: &RequestContext) -> Decision {
        // Pass 1: system rules. A matching deny rejects immediately; a
        // matching allow short-circuits straight to target evaluation.
        for rule in self.sorted_for(Target::System) {
            if rule.match_kind.matches(ctx) {
                match rule.action {
                    Action::Deny => return Decision::Deny { matched_rule: Some(rule.id) },
                    Action::Allow => break,
                }
            }
        }

        // Pass 2: target-specific rules, first match wins.
        for rule in self.sorted_for(ctx.target) {
            if rule.match_kind.matches(ctx) {
                return match rule.action {
                    Action::Allow => Decision::Allow { matched_rule: Some(rule.id) },
                    Action::Deny => Decision::Deny { matched_rule: Some(rule.id) },
                };
            }
        }

        Decision::Allow { matched_rule: None }
    }

    /// Evaluate an UPDATE request, which additionally requires the
    /// presenting TSIG key (if the matched rule names one) and a
    /// per-operation permission flag.
    pub fn evaluate_update(&self, ctx: &RequestContext) -> Decision {
        let base = self.evaluate(ctx);
        let Decision::Allow { matched_rule } = base else {
            return base;
        };

        let Some(rule) = matched_rule.and_then(|id| self.rules.iter().find(|r| r.id == id)) else {
            return base;
        };

        if let Some(ref required_zone) = rule.zone {
            if ctx.operation.is_some() {
                // Zone scoping is informational here; callers filter by
                // zone before invoking the engine, so a mismatch is a
                // configuration error rather than a runtime path.
                let _ = required_zone;
            }
        }

        if let Some(ref required_key) = rule.required_tsig_key {
            match &ctx.presented_tsig_key {
                Some(presented) if presented.eq_ignore_ascii_case(required_key) => {}
                _ => return Decision::Deny { matched_rule: Some(rule.id) },
            }
        }

        let op_allowed = match ctx.operation {
            Some(UpdateOperation::Add) => rule.allow_add,
            Some(UpdateOperation::Delete) => rule.allow_delete,
            Some(UpdateOperation::Update) => rule.allow_update,
            None => true,
        };

        if !op_allowed {
            return Decision::Deny { matched_rule: Some(rule.id) };
        }

        base
    }

    pub fn evaluate_and_record(&self, ctx: &RequestContext, metrics: &MetricsCollector) -> Decision {
        let decision = self.evaluate(ctx);
        let match_kind_label = match decision.matched_rule().and_then(|id| {
            self.rules.iter().find(|r| r.id == id)
        }) {
            Some(rule) => match_kind_label(&rule.match_kind),
            None => "none",
        };
        metrics.record_acl_decision(
            ctx.target.as_str(),
            match_kind_label,
            if decision.is_allowed() { "allow" } else { "deny" },
        );
        decision
    }
}

fn match_kind_label(kind: &MatchKind) -> &'static str {
    match kind {
        MatchKind::Ip(_) => "ip",
        MatchKind::Network(_) => "network",
        MatchKind::Country(_) => "country",
        MatchKind::Asn(_) => "asn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx(ip: &str, target: Target) -> RequestContext {
        RequestContext {
            client_ip: ip.parse().unwrap(),
            country: None,
            asn: None,
            target,
            presented_tsig_key: None,
            operation: None,
        }
    }

    #[test]
    fn default_allow_with_no_rules() {
        let engine = AclEngine::new();
        let decision = engine.evaluate(&ctx("10.0.0.1", Target::Cache));
        assert_eq!(decision, Decision::Allow { matched_rule: None });
    }

    #[test]
    fn system_deny_short_circuits_target_rules() {
        let mut engine = AclEngine::new();
        engine.add_rule(Rule::new(
            1,
            Target::System,
            MatchKind::Ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            Action::Deny,
            0,
        ));
        engine.add_rule(Rule::new(
            2,
            Target::Cache,
            MatchKind::Network("10.0.0.0/8".parse().unwrap()),
            Action::Allow,
            0,
        ));

        let decision = engine.evaluate(&ctx("10.0.0.1", Target::Cache));
        assert_eq!(decision.matched_rule(), Some(1));
        assert!(!decision.is_allowed());
    }

    #[test]
    fn priority_ties_break_by_insertion_order() {
        let mut engine = AclEngine::new();
        engine.add_rule(Rule::new(
            1,
            Target::Cache,
            MatchKind::Network("0.0.0.0/0".parse().unwrap()),
            Action::Deny,
            5,
        ));
        engine.add_rule(Rule::new(
            2,
            Target::Cache,
            MatchKind::Network("0.0.0.0/0".parse().unwrap()),
            Action::Allow,
            5,
        ));

        let decision = engine.evaluate(&ctx("8.8.8.8", Target::Cache));
        assert_eq!(decision.matched_rule(), Some(1));
    }

    #[test]
    fn update_rule_requires_matching_tsig_key() {
        let mut engine = AclEngine::new();
        let mut rule = Rule::new(
            1,
            Target::Master,
            MatchKind::Ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            Action::Allow,
            0,
        );
        rule.required_tsig_key = Some("k.".to_string());
        rule.allow_add = true;
        engine.add_rule(rule);

        let mut request = ctx("127.0.0.1", Target::Master);
        request.operation = Some(UpdateOperation::Add);
        request.presented_tsig_key = None;

        let decision = engine.evaluate_update(&request);
        assert!(!decision.is_allowed());

        request.presented_tsig_key = Some("k.".to_string());
        let decision = engine.evaluate_update(&request);
        assert!(decision.is_allowed());
    }

    #[test]
    fn update_rule_respects_per_operation_flags() {
        let mut engine = AclEngine::new();
        let mut rule = Rule::new(
            1,
            Target::Master,
            MatchKind::Ip(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            Action::Allow,
            0,
        );
        rule.allow_delete = false;
        engine.add_rule(rule);

        let mut request = ctx("127.0.0.1", Target::Master);
        request.operation = Some(UpdateOperation::Delete);
        assert!(!engine.evaluate_update(&request).is_allowed());

        request.operation = Some(UpdateOperation::Add);
        assert!(engine.evaluate_update(&request).is_allowed());
    }
}
