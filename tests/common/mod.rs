//! Scripted provider and canned stage replies shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use trapforge::llm::{
    Choice, FunctionCall, GenerationRequest, GenerationResponse, LlmProvider, Message, ToolCallInfo,
    Usage,
};
use trapforge::LlmError;

pub enum Reply {
    Tool(Value),
    Text(String),
    Fail,
}

/// Pops one reply per call. Runs out into failures.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// `(model, prompt)` for every call so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("lock").len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.calls.lock().expect("lock").push((request.model.clone(), prompt));

        let reply = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Reply::Fail);
        let message = match reply {
            Reply::Tool(value) => Message {
                role: "assistant".to_string(),
                content: String::new(),
                tool_calls: Some(vec![ToolCallInfo {
                    id: "call_0".to_string(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: request.tool_name().unwrap_or_default().to_string(),
                        arguments: value.to_string(),
                    },
                }]),
            },
            Reply::Text(text) => Message::assistant(text),
            Reply::Fail => return Err(LlmError::RequestFailed("script exhausted".to_string())),
        };
        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: "tool_calls".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

pub const CATALOG_NAMES: [&str; 6] = [
    "Ignoring NULL in NOT IN",
    "Filtering outer join in WHERE",
    "Counting duplicates after join",
    "Mixing aggregate and row values",
    "Assuming implicit row order",
    "Comparing strings case-insensitively",
];

const WEAK_SPAN: &str = "WHERE o.status = 'paid' AND c.id NOT IN (SELECT customer_id FROM refunds)";

pub fn categories() -> Reply {
    Reply::Tool(json!({
        "Beginner": ["Inner join keys", "Simple aggregate grouping", "Column alias scoping"],
        "Intermediate": ["Outer join filtering", "Subquery null handling", "Window frame bounds"],
        "Advanced": ["Correlated subquery cost", "Recursive CTE termination", "Isolation level anomalies"],
    }))
}

pub fn catalog() -> Reply {
    let entries: Vec<Value> = CATALOG_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "mistake": name,
                "why_wrong": "It silently changes the result set.",
                "match_hint": "look at the join and filter predicates",
                "impact": if i < 2 { "Major" } else { "Moderate" },
                "domain_specific": true,
                "likelihood_strong_avoids": 0.9,
                "likelihood_weak_makes": 0.7,
            })
        })
        .collect();
    Reply::Tool(json!({ "errors": entries }))
}

pub fn challenge() -> Reply {
    Reply::Tool(json!({
        "title": "Paid customers without refunds",
        "question_text": "Write a query listing customers with a paid order and no refund, including customers with no orders as zero.",
        "context": "The refunds table allows NULL customer ids for anonymous refunds.",
        "artifact_type": "Query",
        "requirements": [
            "Include customers without orders",
            "Exclude customers with refunds",
            "Return one row per customer",
            "Order by customer id",
        ],
        "success_criteria": "Customers with no orders appear with a zero count.",
        "target_error_patterns": [CATALOG_NAMES[0], CATALOG_NAMES[1]],
    }))
}

pub fn invalid_challenge() -> Reply {
    Reply::Tool(json!({
        "title": "Paid customers",
        "question_text": "Write the query.",
        "context": "Orders and refunds.",
        "artifact_type": "Query",
        "requirements": ["Only", "three", "items"],
        "success_criteria": "Correct rows.",
    }))
}

pub fn mid_answer() -> Reply {
    Reply::Text(
        "### OUTPUT\nSELECT c.id FROM customers c LEFT JOIN orders o ON o.customer_id = c.id AND o.status = 'paid' \
WHERE NOT EXISTS (SELECT 1 FROM refunds r WHERE r.customer_id = c.id);\n### RATIONALE\nNOT EXISTS is NULL-safe.\n\
### CONSIDERATIONS\nThe join predicate keeps customers without orders."
            .to_string(),
    )
}

pub fn weak_answer() -> Reply {
    Reply::Text(format!(
        "### OUTPUT\nSELECT c.id FROM customers c LEFT JOIN orders o ON o.customer_id = c.id {};\n\
### RATIONALE\nSimple filter.\n### CONSIDERATIONS\nNone.",
        WEAK_SPAN
    ))
}

pub fn verdict(achieved: bool) -> Reply {
    if achieved {
        Reply::Tool(json!({
            "differentiation_achieved": true,
            "failures_weaker": [CATALOG_NAMES[0], "filtering OUTER join in where", "Forgot a semicolon"],
            "reasoning": "The weak query drops customers without orders and mishandles NULL refunds.",
            "evidence_spans": [WEAK_SPAN],
            "confidence": 0.9,
        }))
    } else {
        Reply::Tool(json!({
            "differentiation_achieved": false,
            "failures_weaker": [],
            "reasoning": "Both models succeeded and avoided every catalog mistake.",
        }))
    }
}

/// A 24-line assessment with one marked span.
pub fn assessment() -> Reply {
    let span = "c.id NOT IN (SELECT customer_id FROM refunds)";
    let mut lines: Vec<String> = (1..=24).map(|i| format!("-- line {}", i)).collect();
    lines[4] = format!("WHERE o.status = 'paid' AND <<{}>>", span);
    Reply::Tool(json!({
        "title": "Refund-aware customer report",
        "difficulty": "Intermediate",
        "content_type": "query",
        "content": lines,
        "errors": [{ "id": span, "description": "NOT IN returns no rows when the subquery yields a NULL." }],
    }))
}

pub fn invalid_assessment() -> Reply {
    Reply::Tool(json!({
        "title": "Refund-aware customer report",
        "difficulty": "Intermediate",
        "content_type": "query",
        "content": ["SELECT 1;"],
        "errors": [],
    }))
}

/// Every reply a run needs to reach Stage 7 on its first attempt.
pub fn happy_path() -> Vec<Reply> {
    vec![
        categories(),
        catalog(),
        challenge(),
        mid_answer(),
        weak_answer(),
        verdict(true),
        assessment(),
    ]
}
