use trendscope::categorize::{builtin_categories, CategoryDefinition, PatternCategorizer};
use trendscope::masking::mask_text;

#[test]
fn variable_tokens_collapse_to_one_template() {
    let a = mask_text("GET https://api.example.com/v1/users?id=7 from 10.1.2.3:443 by ops@example.com");
    let b = mask_text("GET https://api.example.com/v1/orders from 192.168.0.9:8080 by dev@example.org");
    assert_eq!(a, b);
    assert_eq!(a, "GET <URL> from <IP> by <EMAIL>");
}

#[test]
fn hex_ids_and_numbers() {
    assert_eq!(mask_text("trace 4bf92f3577b34da6a3ce929d0e0e4736 step 3"), "trace <HEX> step <NUM>");
    assert_eq!(mask_text("  retry 2 of 5  "), "retry <NUM> of <NUM>");
}

#[test]
fn builtin_categories_match_case_insensitively() {
    let c = PatternCategorizer::default();
    assert_eq!(c.categorize("Connection REFUSED by upstream"), vec!["connection"]);
    assert_eq!(c.categorize("SQL deadlock detected"), vec!["database"]);
    assert_eq!(c.categorize("request Timed Out"), vec!["timeout"]);
    assert!(c.categorize("all good").is_empty());
    assert_eq!(c.definitions().count(), builtin_categories().len());
}

#[test]
fn one_message_can_hit_several_categories() {
    let c = PatternCategorizer::default();
    let ids = c.categorize("database query failed: connection reset by peer");
    assert_eq!(ids, vec!["exception", "connection", "database"]);
}

#[test]
fn custom_definition_overrides_builtin_in_place() {
    let custom = [
        CategoryDefinition::new("timeout", "Slow Calls", &["slow call"], ""),
        CategoryDefinition::new("cache", "Cache", &["cache miss"], ""),
    ];
    let c = PatternCategorizer::new(builtin_categories(), &custom);
    assert_eq!(c.name_of("timeout"), Some("Slow Calls"));
    assert!(c.categorize("request timed out").is_empty());
    assert_eq!(c.categorize("slow call to billing"), vec!["timeout"]);
    assert_eq!(c.definitions().last().map(|d| d.id.as_str()), Some("cache"));
    assert_eq!(c.definitions().nth(1).map(|d| d.id.as_str()), Some("timeout"));
}
