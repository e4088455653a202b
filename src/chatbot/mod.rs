//! Keyword-rule assistant answering questions about the asset fleet.
//!
//! Rules are checked in order and the first match wins.

use crate::error::{AppError, Result};
use crate::metrics::CHAT_QUERIES_TOTAL;
use crate::ml::models::RiskClass;
use crate::ml::service::PredictionService;
use crate::state::{AssetStore, IncidentFilter, LineFilter, TowerFilter};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Days counted as "recent" in fleet statistics
const STATS_RECENT_DAYS: i64 = 30;

const GREETING: &str = "Hello! 👋 I'm your PowerGrid T-LAMP AI Assistant. I can help you with \
information about transmission lines, incidents, and system statistics. How can I assist you today?";

const HELP: &str = "🤖 **I can help you with:**

1. **Statistics** - Ask about total lines, incidents, towers
2. **Recent Incidents** - Get latest tripping data
3. **Risk Analysis** - Identify high-risk transmission lines
4. **Predictions** - AI-powered maintenance predictions

**Try asking:**
- \"How many transmission lines do we have?\"
- \"Show me recent incidents\"
- \"Which lines are high risk?\"
- \"Total incidents last month\"
";

const UNKNOWN: &str =
    "I'm sorry, I didn't quite understand that. Could you try rephrasing? Type 'help' to see what I can do! 🤔";

/// Category of a chatbot answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Greeting,
    Statistic,
    List,
    Analysis,
    Help,
    Unknown,
}

/// Chatbot answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub query: String,
    pub response: String,
    #[serde(rename = "type")]
    pub kind: ReplyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Topic {
    Lines,
    Incidents,
    Towers,
}

pub struct Chatbot {
    store: Arc<dyn AssetStore>,
    predictions: PredictionService,
}

impl Chatbot {
    pub fn new(store: Arc<dyn AssetStore>, predictions: PredictionService) -> Self {
        Self { store, predictions }
    }

    /// Answer `message` relative to today
    pub async fn respond(&self, message: &str) -> Result<ChatReply> {
        self.respond_at(message, Utc::now().date_naive()).await
    }

    /// Answer `message` relative to `today`
    pub async fn respond_at(&self, message: &str, today: NaiveDate) -> Result<ChatReply> {
        CHAT_QUERIES_TOTAL.inc();

        let query = message.to_lowercase();
        let words: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let (response, kind, data) = if ["hello", "hi", "hey"].iter().any(|g| words.contains(g)) {
            (GREETING.to_string(), ReplyKind::Greeting, None)
        } else if let Some(topic) = statistic_topic(&query) {
            self.statistic(topic, today).await?
        } else if query.contains("recent") && query.contains("incident") {
            self.recent_incidents().await?
        } else if query.contains("high risk") || query.contains("risky") {
            self.high_risk(today).await?
        } else if query.contains("help") || query.contains("what can you do") {
            (HELP.to_string(), ReplyKind::Help, None)
        } else {
            (UNKNOWN.to_string(), ReplyKind::Unknown, None)
        };

        tracing::debug!(kind = ?kind, "Chatbot replied");

        Ok(ChatReply {
            query: message.to_string(),
            response,
            kind,
            data,
            timestamp: Utc::now(),
        })
    }

    async fn statistic(&self, topic: Topic, today: NaiveDate) -> Result<(String, ReplyKind, Option<Value>)> {
        match topic {
            Topic::Lines => {
                let total = self.store.count_lines(&LineFilter::default()).await?;
                Ok((
                    format!("📊 We currently have **{} transmission lines** in the system.", total),
                    ReplyKind::Statistic,
                    Some(json!({ "lines": total })),
                ))
            }
            Topic::Incidents => {
                let total = self.store.count_incidents(&IncidentFilter::default()).await?;
                let recent = self
                    .store
                    .count_incidents(&IncidentFilter {
                        since: Some(today - Duration::days(STATS_RECENT_DAYS)),
                        ..Default::default()
                    })
                    .await?;
                Ok((
                    format!(
                        "⚡ Total incidents recorded: **{}**\n\nRecent incidents (last {} days): **{}**",
                        total, STATS_RECENT_DAYS, recent
                    ),
                    ReplyKind::Statistic,
                    Some(json!({ "total": total, "recent": recent })),
                ))
            }
            Topic::Towers => {
                let total = self.store.count_towers(&TowerFilter::default()).await?;
                Ok((
                    format!("🗼 Total towers in the system: **{}**", total),
                    ReplyKind::Statistic,
                    Some(json!({ "towers": total })),
                ))
            }
        }
    }

    async fn line_names(&self) -> Result<HashMap<u64, String>> {
        Ok(self
            .store
            .list_lines(&LineFilter::default())
            .await?
            .into_iter()
            .map(|line| (line.id, line.line_name))
            .collect())
    }

    async fn recent_incidents(&self) -> Result<(String, ReplyKind, Option<Value>)> {
        let names = self.line_names().await?;
        let incidents = self.store.list_incidents(&IncidentFilter::default()).await?;

        let mut response = String::from("📋 **Recent Incidents:**\n\n");
        let mut data = Vec::new();
        for (i, incident) in incidents.iter().take(5).enumerate() {
            let line = names
                .get(&incident.transmission_line_id)
                .map(String::as_str)
                .unwrap_or("unknown line");
            response.push_str(&format!(
                "{}. {} on {} ({})\n",
                i + 1,
                incident.fault_type,
                line,
                incident.fault_date
            ));
            data.push(json!({
                "line": line,
                "type": incident.fault_type,
                "date": incident.fault_date,
            }));
        }

        Ok((response, ReplyKind::List, Some(Value::Array(data))))
    }

    /// Model-predicted High-risk lines when a model is published, otherwise
    /// the lines with the most recorded incidents.
    async fn high_risk(&self, today: NaiveDate) -> Result<(String, ReplyKind, Option<Value>)> {
        match self.predictions.predict_batch(today).await {
            Ok(batch) => {
                let mut high: Vec<_> = batch
                    .predictions
                    .into_iter()
                    .filter(|p| p.predicted_risk == RiskClass::High)
                    .collect();
                high.sort_by(|a, b| {
                    b.risk_probability
                        .total_cmp(&a.risk_probability)
                        .then(a.line_id.cmp(&b.line_id))
                });
                high.truncate(5);

                let mut response = String::from("⚠️ **High Risk Transmission Lines (model prediction):**\n\n");
                if high.is_empty() {
                    response.push_str("No active lines are currently predicted as high risk.\n");
                }
                for (i, p) in high.iter().enumerate() {
                    response.push_str(&format!(
                        "{}. {} - {:.0}% risk, {} recent incidents\n",
                        i + 1,
                        p.line_name,
                        p.risk_probability * 100.0,
                        p.recent_incidents
                    ));
                }
                let data = high
                    .iter()
                    .map(|p| {
                        json!({
                            "line": p.line_name,
                            "risk_probability": p.risk_probability,
                            "recent_incidents": p.recent_incidents,
                        })
                    })
                    .collect();
                Ok((response, ReplyKind::Analysis, Some(Value::Array(data))))
            }
            Err(AppError::ModelNotTrained) => self.most_incidents().await,
            Err(e) => Err(e),
        }
    }

    async fn most_incidents(&self) -> Result<(String, ReplyKind, Option<Value>)> {
        let names = self.line_names().await?;
        let incidents = self.store.list_incidents(&IncidentFilter::default()).await?;

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for incident in &incidents {
            if names.contains_key(&incident.transmission_line_id) {
                *counts.entry(incident.transmission_line_id).or_default() += 1;
            }
        }
        let mut ranked: Vec<(u64, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(3);

        let mut response = String::from("⚠️ **High Risk Transmission Lines:**\n\n");
        let mut data = Vec::new();
        for (i, (line_id, count)) in ranked.iter().enumerate() {
            let name = names.get(line_id).map(String::as_str).unwrap_or_default();
            response.push_str(&format!("{}. {} - {} incidents\n", i + 1, name, count));
            data.push(json!({ "line": name, "incidents": count }));
        }

        Ok((response, ReplyKind::Analysis, Some(Value::Array(data))))
    }
}

fn statistic_topic(query: &str) -> Option<Topic> {
    if !["how many", "total", "count"].iter().any(|k| query.contains(k)) {
        return None;
    }
    if query.contains("line") {
        Some(Topic::Lines)
    } else if query.contains("incident") || query.contains("trip") {
        Some(Topic::Incidents)
    } else if query.contains("tower") {
        Some(Topic::Towers)
    } else {
        None
    }
}
