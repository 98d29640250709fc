//! Rendering of the `LOAD LABEL ... WITH BROKER` statement.

use crate::config::{BrokerCredentials, LoadConfig, LoadLabel};
use crate::ConnectorResult;

/// Keyword that turns a load into a delete-by-load
pub const NEGATIVE_KEYWORD: &str = "NEGATIVE";

/// Everything needed to render one load statement
#[derive(Debug, Clone)]
pub struct LoadCommandParams<'a> {
    pub database: &'a str,
    pub table: &'a str,
    pub label: &'a LoadLabel,
    pub staging_uri: &'a str,
    pub broker: &'a str,
    pub credentials: BrokerCredentials,
    pub timeout_secs: u64,
    pub max_filter_ratio: f64,
    pub delete_flag: &'a str,
    pub negative: bool,
    pub load_options: &'a str,
}

impl<'a> LoadCommandParams<'a> {
    pub fn from_config(
        config: &'a LoadConfig,
        label: &'a LoadLabel,
        staging_uri: &'a str,
    ) -> ConnectorResult<Self> {
        Ok(Self {
            database: &config.database,
            table: &config.table,
            label,
            staging_uri,
            broker: &config.broker,
            credentials: config.credentials()?,
            timeout_secs: config.timeout_secs,
            max_filter_ratio: config.max_filter_ratio,
            delete_flag: &config.delete_flag,
            negative: config.negative,
            load_options: &config.load_options,
        })
    }
}

/// Render the load statement. Pure: the same params always give the same text.
///
/// The output is a single line; line breaks in the caller supplied options
/// fragment are folded into spaces.
pub fn build_load_command(params: &LoadCommandParams<'_>) -> String {
    let mut sql = String::with_capacity(256 + params.load_options.len());

    sql.push_str("LOAD LABEL ");
    sql.push_str(params.database);
    sql.push('.');
    sql.push_str(params.label.as_str());

    sql.push_str(" (DATA INFILE(");
    sql.push_str(&quote_literal(params.staging_uri));
    sql.push(')');
    if params.negative {
        sql.push(' ');
        sql.push_str(NEGATIVE_KEYWORD);
    }
    sql.push_str(" INTO TABLE ");
    sql.push_str(params.table);

    let options = single_line(params.load_options);
    if !options.is_empty() {
        sql.push(' ');
        sql.push_str(&options);
    }
    sql.push(')');

    sql.push_str(" WITH BROKER ");
    sql.push_str(params.broker);
    sql.push_str(&format!(
        " (\"username\"={},\"password\"={})",
        quote_literal(&params.credentials.username),
        quote_literal(&params.credentials.password)
    ));

    sql.push_str(&format!(
        " PROPERTIES(\"timeout\"=\"{}\",\"max_filter_ratio\"=\"{}\",\"load_delete_flag\"={})",
        params.timeout_secs,
        params.max_filter_ratio,
        quote_literal(params.delete_flag)
    ));

    sql
}

/// Double-quoted string literal with backslashes and quotes escaped
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn single_line(fragment: &str) -> String {
    fragment
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Same statement with the broker password masked, for logs
pub fn redact_password(command: &str, credentials: &BrokerCredentials) -> String {
    if credentials.password.is_empty() {
        return command.to_string();
    }
    command.replace(
        &format!("\"password\"={}", quote_literal(&credentials.password)),
        "\"password\"=\"******\"",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(label: &'a LoadLabel) -> LoadCommandParams<'a> {
        LoadCommandParams {
            database: "sales",
            table: "orders",
            label,
            staging_uri: "hdfs://namenode:8020/tmp/doris/batch42",
            broker: "hdfs_broker",
            credentials: BrokerCredentials::parse("hdfs,secret").unwrap(),
            timeout_secs: 3600,
            max_filter_ratio: 0.0,
            delete_flag: "false",
            negative: false,
            load_options: "COLUMNS TERMINATED BY \",\"",
        }
    }

    #[test]
    fn test_command_grammar() {
        let label = LoadLabel::new("batch42").unwrap();
        let sql = build_load_command(&params(&label));
        assert_eq!(
            sql,
            "LOAD LABEL sales.batch42 (DATA INFILE(\"hdfs://namenode:8020/tmp/doris/batch42\") \
             INTO TABLE orders COLUMNS TERMINATED BY \",\") WITH BROKER hdfs_broker \
             (\"username\"=\"hdfs\",\"password\"=\"secret\") \
             PROPERTIES(\"timeout\"=\"3600\",\"max_filter_ratio\"=\"0\",\"load_delete_flag\"=\"false\")"
        );
    }

    #[test]
    fn test_negative_with_filter_ratio() {
        let label = LoadLabel::new("batch42").unwrap();
        let mut p = params(&label);
        p.negative = true;
        p.max_filter_ratio = 0.5;
        p.load_options = "COLUMNS TERMINATED BY \",\"\n(order_id, amount)\r\n";

        let sql = build_load_command(&p);
        assert!(sql.contains("\"max_filter_ratio\"=\"0.5\""));
        assert_eq!(sql.matches(NEGATIVE_KEYWORD).count(), 1);
        assert!(sql.contains("\") NEGATIVE INTO TABLE orders"));
        assert!(!sql.contains('\n'));
        assert!(!sql.contains('\r'));
        assert!(sql.contains("COLUMNS TERMINATED BY \",\" (order_id, amount))"));
    }

    #[test]
    fn test_empty_options_and_deterministic() {
        let label = LoadLabel::new("batch42").unwrap();
        let mut p = params(&label);
        p.load_options = "  \n ";
        let sql = build_load_command(&p);
        assert!(sql.contains("INTO TABLE orders) WITH BROKER"));
        assert_eq!(sql, build_load_command(&p));
    }

    #[test]
    fn test_redact_password() {
        let label = LoadLabel::new("batch42").unwrap();
        let p = params(&label);
        let redacted = redact_password(&build_load_command(&p), &p.credentials);
        assert!(!redacted.contains("secret"));
        assert!(redacted.contains("\"password\"=\"******\""));
    }

    #[test]
    fn test_quotes_in_credentials_are_escaped() {
        let label = LoadLabel::new("batch42").unwrap();
        let mut p = params(&label);
        p.credentials = BrokerCredentials::parse(r#"hdfs,pa"ss\"#).unwrap();

        let sql = build_load_command(&p);
        assert!(sql.contains(r#"("username"="hdfs","password"="pa\"ss\\")"#));

        let redacted = redact_password(&sql, &p.credentials);
        assert!(!redacted.contains(r#"pa\"ss"#));
        assert!(redacted.contains(r#""password"="******")"#));
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain"), r#""plain""#);
        assert_eq!(quote_literal(r#"a"b"#), r#""a\"b""#);
        assert_eq!(quote_literal(r"c:\tmp"), r#""c:\\tmp""#);
        assert_eq!(quote_literal(""), r#""""#);
    }
}
