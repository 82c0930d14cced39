mod common;

use std::sync::Arc;

use common::{FakeWarehouse, account_schemas, columns, comment_of, engine};
use wharf::resolvers::{DatabaseResolver, FunctionResolver, SchemaResolver, TableResolver};
use wharf::transport::Row;
use wharf::{
    ArgumentWithType, Config, DatabaseBlueprint, DatabaseIdent, Driver, FunctionBlueprint,
    ObjectKind, ResolveOutcome, ResolverStatus, SchemaBlueprint, SchemaIdent, SchemaObjectIdent,
    SchemaObjectIdentWithArgs, Settings, TableBlueprint, TableColumn, resolve,
};

const PREFIX: &str = "DEV__";

fn database() -> DatabaseBlueprint {
    DatabaseBlueprint::new(DatabaseIdent::new(PREFIX, "acme").unwrap())
}

fn schema() -> SchemaBlueprint {
    SchemaBlueprint::new(SchemaIdent::new(PREFIX, "acme", "sales").unwrap())
}

fn orders(columns: Vec<TableColumn>) -> TableBlueprint {
    TableBlueprint::new(
        SchemaObjectIdent::new(PREFIX, "acme", "sales", "orders").unwrap(),
        columns,
    )
}

fn tax(comment: &str) -> FunctionBlueprint {
    let object = SchemaObjectIdent::new(PREFIX, "acme", "sales", "tax").unwrap();
    FunctionBlueprint {
        full_name: SchemaObjectIdentWithArgs::new(object, &["NUMBER"]).unwrap(),
        language: "SQL".to_string(),
        arguments: vec![ArgumentWithType::new("amount", "NUMBER(38,2)")],
        returns: "NUMBER(38,2)".to_string(),
        body: "amount * 0.2".to_string(),
        is_secure: false,
        is_immutable: true,
        runtime_version: None,
        comment: Some(comment.to_string()),
        depends_on: Vec::new(),
    }
}

/// A warehouse with one `ORDERS` table with the given columns.
fn warehouse_with_orders(desc: &[(&str, &str, bool)]) -> Arc<FakeWarehouse> {
    Arc::new(
        FakeWarehouse::new()
            .respond(
                "SHOW SCHEMAS IN ACCOUNT",
                account_schemas(&[("DEV__ACME", "SALES")]),
            )
            .respond(
                "SHOW TABLES IN SCHEMA",
                vec![
                    Row::new()
                        .with("name", "ORDERS")
                        .with("kind", "TABLE")
                        .with("change_tracking", "OFF"),
                ],
            )
            .respond("DESC TABLE", columns(desc)),
    )
}

#[tokio::test]
async fn test_new_database_creates_and_drops_public() {
    let warehouse = Arc::new(FakeWarehouse::new());
    let mut config = Config::new(PREFIX);
    config.add_blueprint(database());

    let result = resolve(
        Arc::new(DatabaseResolver),
        engine(&warehouse, config, Settings::apply_all()),
    )
    .await
    .unwrap();

    assert_eq!(result.outcomes["DEV__ACME"], ResolveOutcome::Create);
    assert_eq!(
        warehouse.ddl(),
        vec![
            "CREATE DATABASE \"DEV__ACME\"",
            "DROP SCHEMA \"DEV__ACME\".\"PUBLIC\"",
        ]
    );
}

#[tokio::test]
async fn test_new_nullable_column_is_an_alter() {
    let warehouse = warehouse_with_orders(&[("ID", "NUMBER(38,0)", false)]);
    let mut config = Config::new(PREFIX);
    config.add_blueprint(orders(vec![
        TableColumn::new("id", "number", false),
        TableColumn::new("note", "varchar", true),
    ]));

    let result = resolve(
        Arc::new(TableResolver),
        engine(&warehouse, config, Settings::apply_all()),
    )
    .await
    .unwrap();

    assert_eq!(result.outcomes["DEV__ACME.SALES.ORDERS"], ResolveOutcome::Alter);
    assert_eq!(
        warehouse.ddl(),
        vec!["ALTER TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\" ADD COLUMN \"NOTE\" VARCHAR"]
    );
}

#[tokio::test]
async fn test_incompatible_type_change_is_a_gated_replace() {
    let warehouse = warehouse_with_orders(&[("ID", "VARCHAR(10)", false)]);
    let mut config = Config::new(PREFIX);
    config.add_blueprint(orders(vec![TableColumn::new("id", "number", false)]));
    let settings = Settings {
        execute_replace_table: false,
        ..Settings::apply_all()
    };
    let engine = engine(&warehouse, config, settings);

    let result = resolve(Arc::new(TableResolver), engine.clone())
        .await
        .unwrap();

    assert_eq!(
        result.outcomes["DEV__ACME.SALES.ORDERS"],
        ResolveOutcome::Replace
    );
    assert!(warehouse.ddl().is_empty());
    assert!(engine.executed_ddl().is_empty());
    insta::assert_debug_snapshot!(engine.suggested_ddl(), @r#"
    [
        "CREATE OR REPLACE TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\" (\"ID\" NUMBER NOT NULL) COPY GRANTS AS SELECT \"ID\"::NUMBER AS \"ID\" FROM \"DEV__ACME\".\"SALES\".\"ORDERS\"",
    ]
    "#);
    assert!(
        engine
            .intentions()
            .is_marked_replace(ObjectKind::Table, "DEV__ACME.SALES.ORDERS")
    );
}

#[tokio::test]
async fn test_replace_runs_when_allowed() {
    let warehouse = warehouse_with_orders(&[("ID", "VARCHAR(10)", false)]);
    let mut config = Config::new(PREFIX);
    config.add_blueprint(orders(vec![TableColumn::new("id", "number", false)]));

    let result = resolve(
        Arc::new(TableResolver),
        engine(&warehouse, config, Settings::apply_all()),
    )
    .await
    .unwrap();

    assert_eq!(
        result.outcomes["DEV__ACME.SALES.ORDERS"],
        ResolveOutcome::Replace
    );
    assert_eq!(warehouse.ddl().len(), 1);
    assert!(warehouse.ddl()[0].starts_with("CREATE OR REPLACE TABLE"));
}

#[tokio::test]
async fn test_dropped_database_takes_its_schemas_along() {
    let warehouse = Arc::new(
        FakeWarehouse::new()
            .respond("SHOW DATABASES", vec![Row::new().with("name", "DEV__ACME")])
            .respond(
                "SHOW SCHEMAS IN DATABASE",
                vec![Row::new().with("name", "SALES")],
            ),
    );
    let driver = Driver::new().with(DatabaseResolver).with(SchemaResolver);

    let report = driver
        .apply(engine(&warehouse, Config::new(PREFIX), Settings::apply_all()))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(warehouse.ddl(), vec!["DROP DATABASE \"DEV__ACME\""]);
    assert!(
        !warehouse
            .statements()
            .iter()
            .any(|s| s.starts_with("SHOW SCHEMAS IN DATABASE"))
    );
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let desc = [("ID", "NUMBER(38,0)", false), ("NOTE", "VARCHAR(16777216)", true)];
    let declared = || {
        let mut config = Config::new(PREFIX);
        config.add_blueprint(orders(vec![
            TableColumn::new("id", "number", false),
            TableColumn::new("note", "varchar", true),
        ]));
        config.add_blueprint(tax("sales tax"));
        config
    };

    // First run: the function does not exist yet.
    let first = warehouse_with_orders(&desc);
    let report = Driver::new()
        .with(FunctionResolver)
        .with(TableResolver)
        .apply(engine(&first, declared(), Settings::apply_all()))
        .await
        .unwrap();
    assert_eq!(
        report.result(ObjectKind::Function).unwrap().outcomes["DEV__ACME.SALES.TAX(NUMBER)"],
        ResolveOutcome::Create
    );
    let stored = comment_of(&first.ddl()[0]).unwrap();
    assert!(stored.starts_with("sales tax #"));

    // Second run: the warehouse now reports what the first run created.
    let second = Arc::new(
        FakeWarehouse::new()
            .respond(
                "SHOW SCHEMAS IN ACCOUNT",
                account_schemas(&[("DEV__ACME", "SALES")]),
            )
            .respond(
                "SHOW USER FUNCTIONS IN SCHEMA",
                vec![
                    Row::new()
                        .with("name", "TAX")
                        .with("arguments", "TAX(NUMBER) RETURN NUMBER")
                        .with("description", stored.as_str()),
                ],
            )
            .respond(
                "SHOW TABLES IN SCHEMA",
                vec![Row::new().with("name", "ORDERS").with("kind", "TABLE")],
            )
            .respond("DESC TABLE", columns(&desc)),
    );
    let report = Driver::new()
        .with(FunctionResolver)
        .with(TableResolver)
        .apply(engine(&second, declared(), Settings::apply_all()))
        .await
        .unwrap();

    assert!(report.results.iter().all(|r| r.is_converged()));
    assert!(second.ddl().is_empty());
}

#[tokio::test]
async fn test_comment_change_converges_after_one_replace() {
    let run = |stored: String, comment: &'static str| async move {
        let warehouse = Arc::new(
            FakeWarehouse::new()
                .respond(
                    "SHOW SCHEMAS IN ACCOUNT",
                    account_schemas(&[("DEV__ACME", "SALES")]),
                )
                .respond(
                    "SHOW USER FUNCTIONS IN SCHEMA",
                    vec![
                        Row::new()
                            .with("name", "TAX")
                            .with("arguments", "TAX(NUMBER) RETURN NUMBER")
                            .with("description", stored),
                    ],
                ),
        );
        let mut config = Config::new(PREFIX);
        config.add_blueprint(tax(comment));
        let result = resolve(
            Arc::new(FunctionResolver),
            engine(&warehouse, config, Settings::apply_all()),
        )
        .await
        .unwrap();
        (result.outcomes["DEV__ACME.SALES.TAX(NUMBER)"], warehouse.ddl())
    };

    // Exists, but was never stamped with a hash
    let (outcome, ddl) = run(String::new(), "sales tax").await;
    assert_eq!(outcome, ResolveOutcome::Replace);
    let stored = comment_of(&ddl[0]).unwrap();

    // then the comment is edited
    let (outcome, ddl) = run(stored, "tax on sales").await;
    assert_eq!(outcome, ResolveOutcome::Replace);
    let stored = comment_of(&ddl[0]).unwrap();
    assert!(stored.starts_with("tax on sales #"));

    let (outcome, ddl) = run(stored, "tax on sales").await;
    assert_eq!(outcome, ResolveOutcome::NoChange);
    assert!(ddl.is_empty());
}

#[tokio::test]
async fn test_plan_mode_executes_nothing() {
    let warehouse = Arc::new(FakeWarehouse::new());
    let mut config = Config::new(PREFIX);
    config.add_blueprint(database());
    config.add_blueprint(schema());
    config.add_blueprint(orders(vec![TableColumn::new("id", "number", false)]));

    let report = Driver::standard()
        .apply(engine(&warehouse, config, Settings::default()))
        .await
        .unwrap();

    assert!(report.is_success());
    assert!(report.executed_ddl().is_empty());
    assert!(warehouse.ddl().is_empty());
    let suggested = report.suggested_ddl();
    assert!(suggested.contains(&"CREATE DATABASE \"DEV__ACME\"".to_string()));
    assert!(suggested.contains(&"CREATE SCHEMA \"DEV__ACME\".\"SALES\"".to_string()));
    assert!(
        suggested
            .iter()
            .any(|s| s.starts_with("CREATE TABLE \"DEV__ACME\".\"SALES\".\"ORDERS\""))
    );
    assert!(suggested.iter().any(|s| s.starts_with("CREATE ROLE")));
}

#[tokio::test]
async fn test_failed_introspection_does_not_stop_the_run() {
    let warehouse = Arc::new(FakeWarehouse::new().fail("SHOW DATABASES"));
    let mut config = Config::new(PREFIX);
    config.add_blueprint(database());
    config.add_blueprint(schema());

    let report = Driver::standard()
        .apply(engine(&warehouse, config, Settings::apply_all()))
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(
        report.result(ObjectKind::Database).unwrap().status,
        ResolverStatus::Failed(_)
    ));
    assert!(matches!(
        report.result(ObjectKind::Schema).unwrap().status,
        ResolverStatus::Failed(_)
    ));
    let roles = report.result(ObjectKind::Role).unwrap();
    assert_eq!(roles.status, ResolverStatus::Completed);
    assert!(roles.count(ResolveOutcome::Create) > 0);
}

#[tokio::test]
async fn test_destroy_runs_in_reverse_order() {
    let warehouse = Arc::new(
        FakeWarehouse::new()
            .respond("SHOW DATABASES", vec![Row::new().with("name", "DEV__ACME")])
            .respond(
                "SHOW SCHEMAS IN DATABASE",
                vec![Row::new().with("name", "SALES")],
            )
            .respond(
                "SHOW WAREHOUSES",
                vec![
                    Row::new().with("name", "DEV__LOAD"),
                    Row::new().with("name", "PROD__LOAD"),
                ],
            ),
    );

    let report = Driver::standard()
        .destroy(engine(&warehouse, Config::new(PREFIX), Settings::apply_all()))
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.results.first().unwrap().kind, ObjectKind::MaskingPolicy);
    assert_eq!(
        warehouse.ddl(),
        vec![
            "DROP WAREHOUSE \"DEV__LOAD\"",
            "DROP SCHEMA \"DEV__ACME\".\"SALES\"",
            "DROP DATABASE \"DEV__ACME\"",
        ]
    );
}
