use serde_json::Value;

/// Keyword table for agent-type classification, checked in order.
/// First match wins, so more specific keywords must precede generic ones
/// (e.g. "database" before "data").
const KEYWORD_BUCKETS: &[(&str, &str)] = &[
    ("security", "security"),
    ("audit", "security"),
    ("debug", "debugger"),
    ("test", "tester"),
    ("qa", "tester"),
    ("review", "reviewer"),
    ("critic", "reviewer"),
    ("lint", "linter"),
    ("format", "linter"),
    ("optimi", "optimizer"),
    ("perf", "optimizer"),
    ("analy", "analyzer"),
    ("research", "analyzer"),
    ("deploy", "deployer"),
    ("release", "deployer"),
    ("build", "builder"),
    ("implement", "builder"),
    ("engineer", "builder"),
    ("doc", "writer"),
    ("write", "writer"),
    ("translat", "translator"),
    ("i18n", "translator"),
    ("generat", "generator"),
    ("scaffold", "generator"),
    ("monitor", "monitor"),
    ("watch", "monitor"),
    ("config", "configurator"),
    ("setup", "configurator"),
    ("context", "context"),
    ("memory", "context"),
    ("collect", "collector"),
    ("scrape", "collector"),
    ("storage", "storage"),
    ("persist", "storage"),
    ("search", "searcher"),
    ("find", "searcher"),
    ("api", "api-handler"),
    ("endpoint", "api-handler"),
    ("integrat", "integrator"),
    ("bridge", "integrator"),
    ("ui", "ui-developer"),
    ("frontend", "ui-developer"),
    ("design", "designer"),
    ("ml", "ml-engineer"),
    ("model", "ml-engineer"),
    ("train", "ml-engineer"),
    ("predict", "predictor"),
    ("forecast", "predictor"),
    ("database", "database-admin"),
    ("sql", "database-admin"),
    ("migration", "database-admin"),
    ("etl", "data-processor"),
    ("pipeline", "data-processor"),
    ("process", "data-processor"),
    ("data", "data-manager"),
];

/// Classify an agent into one of the known type buckets when the producer
/// did not send `agent_type`.
///
/// Deterministic over the agent name plus the payload's `task_description`;
/// unmatched names fall through to `generic`.
pub fn classify_agent_type(agent_name: &str, payload: &Value) -> &'static str {
    let mut haystack = agent_name.to_lowercase();
    if let Some(task) = payload.get("task_description").and_then(Value::as_str) {
        haystack.push(' ');
        haystack.push_str(&task.to_lowercase());
    }

    for (keyword, bucket) in KEYWORD_BUCKETS {
        if haystack.contains(keyword) {
            return bucket;
        }
    }

    "generic"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_by_name_keyword() {
        assert_eq!(classify_agent_type("code-reviewer", &Value::Null), "reviewer");
        assert_eq!(classify_agent_type("DB-Migrator", &Value::Null), "database-admin");
        assert_eq!(classify_agent_type("perf-tuner", &Value::Null), "optimizer");
    }

    #[test]
    fn falls_back_to_task_description() {
        let payload = json!({"task_description": "Deploy the staging build"});
        assert_eq!(classify_agent_type("helper", &payload), "deployer");
    }

    #[test]
    fn unmatched_names_are_generic() {
        assert_eq!(classify_agent_type("zzz", &Value::Null), "generic");
    }

    #[test]
    fn specific_keywords_win_over_data() {
        // "database" must not be swallowed by the broader "data" bucket
        assert_eq!(classify_agent_type("database-helper", &Value::Null), "database-admin");
        assert_eq!(classify_agent_type("data-wrangler", &Value::Null), "data-manager");
    }
}
