#[cfg(test)]
mod tests {
    use std::io::Write;
    use tempfile::NamedTempFile;
    use crate::config::models::HandlerType;
    use crate::config::parser::{load_config, ConfigError};

    // Helper function to create a temporary file with content
    fn create_temp_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes()).expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_valid_configuration() {
        let config_yaml = r#"
        stream: stacks-mainnet
        bootstrap:
          index: 100
          hash: "0x0000000000000000000000000000000000000000000000000000000000000064"
        tracker:
          history_depth: 64
        dispatch:
          handler_timeout_ms: 2000
          max_attempts: 5
          concurrent_handlers: true
          replay_duplicates: true
        backfill:
          max_attempts: 2
          max_parked_payloads: 8
        chain_query:
          base_url: https://api.hiro.so/extended/v2
          timeout_seconds: 10
        database:
          enabled: true
        handlers:
          - name: audit
            type: log_only
            priority: 10
            events: [ft_transfer, print]
          - name: events
            type: store_db
            priority: 20
            transactions: [contract_call]
            include_failed: true
        metrics:
          enabled: false
          port: 9100
        "#;

        let temp_file = create_temp_file(config_yaml);
        let config = load_config(temp_file.path()).expect("Failed to load valid config");

        assert_eq!(config.stream, "stacks-mainnet");
        assert_eq!(config.bootstrap.as_ref().unwrap().index, 100);
        assert_eq!(config.tracker.history_depth, 64);

        assert_eq!(config.dispatch.handler_timeout_ms, 2000);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.dispatch.initial_backoff_ms, 200);
        assert!(config.dispatch.concurrent_handlers);
        assert!(config.dispatch.replay_duplicates);
        assert!(!config.dispatch.halt_on_exhausted_transient);

        assert_eq!(config.backfill.max_attempts, 2);
        assert_eq!(config.backfill.max_parked_payloads, 8);
        assert_eq!(config.backfill.fetch_timeout_ms, 10_000);

        let chain_query = config.chain_query.as_ref().unwrap();
        assert_eq!(chain_query.base_url, "https://api.hiro.so/extended/v2");
        assert_eq!(chain_query.api_key, None);
        assert_eq!(chain_query.timeout_seconds, 10);

        assert_eq!(config.handlers.len(), 2);
        assert_eq!(config.handlers[0].handler_type, HandlerType::LogOnly);
        assert_eq!(config.handlers[0].events, vec!["ft_transfer", "print"]);
        assert_eq!(config.handlers[1].handler_type, HandlerType::StoreDb);
        assert!(config.handlers[1].include_failed);

        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_env_substitution_in_api_key() {
        std::env::set_var("CHAINHOOK_CONFIG_TEST_API_KEY", "key-from-env");
        let config_yaml = r#"
        stream: testnet
        chain_query:
          base_url: http://localhost:3999
          api_key: ${CHAINHOOK_CONFIG_TEST_API_KEY}
        "#;

        let temp_file = create_temp_file(config_yaml);
        let config = load_config(temp_file.path()).expect("Failed to load config");
        assert_eq!(
            config.chain_query.unwrap().api_key,
            Some("key-from-env".to_string())
        );
    }

    #[test]
    fn test_empty_stream_name() {
        let temp_file = create_temp_file("stream: \"\"\n");
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_attempts_and_timeouts() {
        for config_yaml in [
            "stream: s\ndispatch:\n  max_attempts: 0\n",
            "stream: s\ndispatch:\n  handler_timeout_ms: 0\n",
            "stream: s\nbackfill:\n  fetch_timeout_ms: 0\n",
            "stream: s\ntracker:\n  history_depth: 0\n",
        ] {
            let temp_file = create_temp_file(config_yaml);
            let result = load_config(temp_file.path());
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {config_yaml:?}"
            );
        }
    }

    #[test]
    fn test_unknown_event_kind() {
        let config_yaml = r#"
        stream: s
        handlers:
          - name: audit
            type: log_only
            events: [not_an_event]
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_unknown_handler_type() {
        let config_yaml = r#"
        stream: s
        handlers:
          - name: audit
            type: webhook
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_duplicate_handler_names() {
        let config_yaml = r#"
        stream: s
        handlers:
          - name: audit
            type: log_only
          - name: audit
            type: log_only
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        if let Err(ConfigError::Other(err)) = result {
            assert!(err.contains("'audit' is defined more than once"));
        } else {
            panic!("Expected Other error for duplicate handler names");
        }
    }

    #[test]
    fn test_store_db_requires_database() {
        let config_yaml = r#"
        stream: s
        handlers:
          - name: events
            type: store_db
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        if let Err(ConfigError::Other(err)) = result {
            assert!(err.contains("database is not enabled"));
        } else {
            panic!("Expected Other error for store_db without database");
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let config_yaml = r#"
        stream: s
        backfill:
          initial_backoff_ms: 5000
          max_backoff_ms: 100
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Other(_))));
    }

    #[test]
    fn test_chain_query_url_scheme() {
        let config_yaml = r#"
        stream: s
        chain_query:
          base_url: ftp://indexer.example
        "#;
        let temp_file = create_temp_file(config_yaml);
        assert!(matches!(load_config(temp_file.path()), Err(ConfigError::Other(_))));

        // not checked when backfill is disabled
        let config_yaml = r#"
        stream: s
        backfill:
          enabled: false
        chain_query:
          base_url: ftp://indexer.example
        "#;
        let temp_file = create_temp_file(config_yaml);
        assert!(load_config(temp_file.path()).is_ok());

        let config_yaml = r#"
        stream: s
        chain_query:
          base_url: not-a-valid-url
        "#;
        let temp_file = create_temp_file(config_yaml);
        assert!(matches!(
            load_config(temp_file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_bootstrap_hash() {
        let config_yaml = r#"
        stream: s
        bootstrap:
          index: 10
          hash: "0x1234"
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::Other(_))));
    }

    #[test]
    fn test_invalid_yaml() {
        let config_yaml = r#"
        stream: s
        handlers:
          - name: audit
          - this is not valid yaml
        "#;

        let temp_file = create_temp_file(config_yaml);
        let result = load_config(temp_file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config("/nonexistent/chainhook-ingest/config.yaml");
        assert!(matches!(result, Err(ConfigError::FileError(_))));
    }
}
