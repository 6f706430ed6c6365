use proptest::prelude::*;

/// Strategy for generating event names
pub fn event_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,20}"
}

/// Strategy for generating sets of event names in arbitrary order
pub fn event_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(event_name_strategy(), 1..6)
}

/// Strategy for generating delay/ttl pairs in seconds, negative values included
pub fn timing_strategy() -> impl Strategy<Value = (i64, i64)> {
    (-3600i64..86_400, -3600i64..86_400)
}
