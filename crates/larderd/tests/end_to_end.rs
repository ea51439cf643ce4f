use std::fs;
use std::path::{Path, PathBuf};

use larder_config::brands_path;
use larder_publish::{
    AllowlistService, AllowlistStatus, PublishedProduct, ViewKind, ViewPublisher,
};
use larder_store::SqliteStore;
use larderd::cli::{AllowlistCommand, OutputFormat, RunArgs, TransitionArgs, ViewsArgs};
use larderd::commands::{
    run_allowlist_command, run_init_command, run_publish_command, run_rollback_command,
    run_run_command, run_views_command,
};
use larderd::{RunError, RunOptions, run_once};
use serde_json::Value;
use tempfile::tempdir;

const BRANDS: &str = r#"
version = "2024-06-01"

[[brands]]
slug = "barking_heads"
display_name = "Barking Heads"

[[brands]]
slug = "arden_grange"
display_name = "Arden Grange"

[[brands]]
slug = "royal_canin"
display_name = "Royal Canin"

[[multi_word]]
name = "Barking Heads"

[[multi_word]]
name = "Arden Grange"

[[multi_word]]
name = "Royal Canin"
"#;

const FIRST_FEED: &[&str] = &[
    r#"{"source_type":"manufacturer","source_id":"bh_site","row_ref":"fat-dog","fields":{"brand":"barking","name":"Heads Fat Dog Slim","form":"dry","life_stage":"adult","kcal_per_100g":338,"ingredients_tokens":["chicken","rice"],"updated_at":"2024-05-01"}}"#,
    r#"{"source_type":"retailer","source_id":"zooplus","row_ref":"sku-1","fields":{"brand":"barking_heads","title":"Fat Dog Slim","food_type":"dry","price_per_kg":4.2,"updated_at":"2024-05-02"}}"#,
    r#"{"source_type":"manufacturer","source_id":"bh_site","row_ref":"puppy","fields":{"brand":"Barking Heads","name":"Puppy Days","form":"dry","life_stage":"puppy","kcal_per_100g":390,"ingredients_tokens":["chicken","salmon"],"price_per_kg":5.9,"updated_at":"2024-05-01"}}"#,
    r#"{"source_type":"manufacturer","source_id":"ag_site","row_ref":"cr","fields":{"brand":"Arden","name":"Grange Chicken & Rice","form":"dry","kcal_per_100g":380,"updated_at":"2024-05-01"}}"#,
    r#"{"source_type":"manufacturer","source_id":"ag_site","row_ref":"nameless","fields":{"brand":"Arden Grange","name":"","updated_at":"2024-05-01"}}"#,
    r#"{"source_type":"retailer","source_id":"zooplus","row_ref":"sku-bad","fields":{"brand":"Royal Canin","title":"Maxi Adult","price_per_kg":"cheap","updated_at":"2024-05-02"}}"#,
];

const SECOND_FEED: &[&str] = &[
    r#"{"source_type":"retailer","source_id":"petsathome","row_ref":"ag-77","fields":{"brand":"Arden Grange","title":"Chicken & Rice","food_type":"dry","age_group":"adult","ingredients_tokens":["chicken","rice","beet pulp"],"price_per_kg":6.5,"updated_at":"2024-06-01"}}"#,
];

fn init_workspace() -> tempfile::TempDir {
    let temp = tempdir().expect("tempdir");
    let mut out = Vec::new();
    run_init_command(temp.path(), &mut out).expect("init workspace");
    fs::write(brands_path(temp.path()), BRANDS).expect("write brand table");
    temp
}

fn write_feed(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n")).expect("write feed");
    path
}

fn run_json(workspace: &Path, input: PathBuf, run_id: &str) -> Value {
    let mut out = Vec::new();
    run_run_command(
        workspace,
        RunArgs {
            inputs: vec![input],
            run_id: Some(run_id.to_owned()),
        },
        OutputFormat::Json,
        &mut out,
    )
    .expect("run command");
    serde_json::from_slice(&out).expect("run report json")
}

fn transition(brand: &str, reason: &str) -> TransitionArgs {
    TransitionArgs {
        brand: brand.to_owned(),
        actor: Some("catalog-ops".to_owned()),
        reason: reason.to_owned(),
        expected_revision: None,
    }
}

fn allowlist(workspace: &Path, command: AllowlistCommand) -> anyhow::Result<String> {
    let mut out = Vec::new();
    run_allowlist_command(workspace, command, OutputFormat::Table, &mut out)?;
    Ok(String::from_utf8(out).expect("utf8 output"))
}

fn production(workspace: &Path) -> Vec<PublishedProduct> {
    let publisher = ViewPublisher::open(workspace).expect("open publisher");
    let views = publisher
        .current()
        .expect("read views")
        .expect("published generation");
    views.view(ViewKind::Production).to_vec()
}

fn production_keys(workspace: &Path) -> Vec<String> {
    production(workspace)
        .iter()
        .map(|entry| entry.product.key.to_string())
        .collect()
}

fn arden_price(workspace: &Path) -> Option<f64> {
    production(workspace)
        .into_iter()
        .find(|entry| entry.product.brand_slug() == "arden_grange")
        .and_then(|entry| entry.product.price_per_kg)
}

#[test]
fn ingest_gate_publish_and_roll_back() {
    let temp = init_workspace();
    let workspace = temp.path();

    let first = run_json(
        workspace,
        write_feed(workspace, "first.jsonl", FIRST_FEED),
        "run-1",
    );
    assert_eq!(first["records_in"], 6);
    assert_eq!(first["adapted"], 5);
    assert_eq!(first["orphaned"], 1);
    assert_eq!(first["linked"], 4);
    assert_eq!(
        first["products_created"]
            .as_array()
            .expect("created keys")
            .len(),
        3
    );
    let residual_refs = first["residuals"]
        .as_array()
        .expect("residuals")
        .iter()
        .map(|residual| residual["row_ref"].as_str().unwrap_or_default().to_owned())
        .collect::<Vec<_>>();
    assert_eq!(residual_refs, vec!["nameless".to_owned(), "sku-bad".to_owned()]);

    let added = allowlist(
        workspace,
        AllowlistCommand::Add(transition("barking_heads", "launch partner")),
    )
    .expect("add barking heads");
    assert!(added.contains("barking_heads\tACTIVE\ttrue"));

    allowlist(
        workspace,
        AllowlistCommand::Add(transition("Arden Grange", "requested by merchandising")),
    )
    .expect("add arden grange");
    let service = AllowlistService::new(workspace);
    let arden = service
        .entry("arden_grange")
        .expect("read entry")
        .expect("entry exists");
    assert_eq!(arden.status, AllowlistStatus::Pending);
    assert!(!arden.quality_gate_passed);

    let rejected = allowlist(
        workspace,
        AllowlistCommand::Promote(transition("arden_grange", "looks fine")),
    )
    .expect_err("arden grange is not PASS yet");
    let message = format!("{rejected:#}");
    assert!(message.contains("PROMOTE rejected for brand 'arden_grange'"), "{message}");
    assert!(message.contains("life_stage_cov"), "{message}");

    let mut out = Vec::new();
    run_publish_command(workspace, OutputFormat::Table, &mut out).expect("publish");
    assert_eq!(production_keys(workspace).len(), 2);
    assert!(
        production_keys(workspace)
            .iter()
            .all(|key| key.starts_with("barking_heads|"))
    );

    let mut out = Vec::new();
    run_views_command(
        workspace,
        ViewsArgs {
            kind: ViewKind::Preview,
        },
        OutputFormat::Table,
        &mut out,
    )
    .expect("preview view");
    let preview = String::from_utf8(out).expect("utf8 output");
    assert_eq!(preview.lines().count(), 4);
    assert!(preview.contains("\tPENDING\t"));

    let second = run_json(
        workspace,
        write_feed(workspace, "second.jsonl", SECOND_FEED),
        "run-2",
    );
    assert_eq!(second["linked"], 1);
    let updated = second["products_updated"].as_array().expect("updated keys");
    assert_eq!(updated.len(), 1);
    assert!(
        updated[0]
            .as_str()
            .is_some_and(|key| key.starts_with("arden_grange|"))
    );

    allowlist(
        workspace,
        AllowlistCommand::Promote(transition("arden_grange", "coverage complete")),
    )
    .expect("promote after enrichment");
    assert_eq!(production_keys(workspace).len(), 3);
    assert_eq!(arden_price(workspace), None);

    let mut out = Vec::new();
    run_publish_command(workspace, OutputFormat::Table, &mut out).expect("publish again");
    assert_eq!(production_keys(workspace).len(), 3);
    assert_eq!(arden_price(workspace), Some(6.5));

    let mut out = Vec::new();
    run_rollback_command(workspace, OutputFormat::Table, &mut out).expect("rollback");
    assert_eq!(production_keys(workspace).len(), 3);
    assert_eq!(arden_price(workspace), None);

    let mut out = Vec::new();
    assert!(run_rollback_command(workspace, OutputFormat::Table, &mut out).is_err());

    allowlist(
        workspace,
        AllowlistCommand::Pause(transition("barking_heads", "supplier recall")),
    )
    .expect("pause barking heads");
    let remaining = production_keys(workspace);
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].starts_with("arden_grange|"));

    allowlist(
        workspace,
        AllowlistCommand::Remove(transition("arden_grange", "discontinued")),
    )
    .expect("remove arden grange");
    assert!(production_keys(workspace).is_empty());

    let history = service.audit(Some("arden_grange")).expect("audit");
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].old_status, Some(AllowlistStatus::Pending));
    assert_eq!(history[1].new_status, AllowlistStatus::Active);
    assert_eq!(history[1].actor, "catalog-ops");
    assert_eq!(history[2].new_status, AllowlistStatus::Removed);
}

#[test]
fn rollback_never_reinstates_a_removed_brand() {
    let temp = init_workspace();
    let workspace = temp.path();
    run_json(
        workspace,
        write_feed(workspace, "first.jsonl", FIRST_FEED),
        "run-1",
    );
    allowlist(
        workspace,
        AllowlistCommand::Add(transition("barking_heads", "launch partner")),
    )
    .expect("add barking heads");

    for _ in 0..2 {
        let mut out = Vec::new();
        run_publish_command(workspace, OutputFormat::Table, &mut out).expect("publish");
    }
    let publisher = ViewPublisher::open(workspace).expect("open publisher");
    let rollback_target = publisher
        .previous()
        .expect("read views")
        .expect("previous generation");
    assert_eq!(rollback_target.production.len(), 2);

    allowlist(
        workspace,
        AllowlistCommand::Remove(transition("barking_heads", "contract ended")),
    )
    .expect("remove barking heads");
    assert!(production_keys(workspace).is_empty());

    let mut out = Vec::new();
    run_rollback_command(workspace, OutputFormat::Json, &mut out).expect("rollback");
    let restored: Value = serde_json::from_slice(&out).expect("rollback json");

    assert_eq!(restored["production"], 0);
    assert!(production_keys(workspace).is_empty());
}

#[test]
fn repeated_run_changes_nothing() {
    let temp = init_workspace();
    let workspace = temp.path();
    let feed = write_feed(workspace, "first.jsonl", FIRST_FEED);

    run_json(workspace, feed.clone(), "run-1");
    let before = SqliteStore::open(workspace)
        .expect("store")
        .list_products()
        .expect("products");

    let again = run_json(workspace, feed, "run-2");
    assert_eq!(again["linked"], 0);
    assert_eq!(again["duplicates"], 4);
    assert_eq!(again["products_created"].as_array().map(Vec::len), Some(0));
    assert_eq!(again["products_updated"].as_array().map(Vec::len), Some(0));

    let store = SqliteStore::open(workspace).expect("store");
    let after = store.list_products().expect("products");
    let fingerprints =
        |rows: &[larder_store::ProductRecord]| -> Vec<(String, String)> {
            rows.iter()
                .map(|row| (row.product_key.clone(), row.product_json.clone()))
                .collect()
        };
    assert_eq!(fingerprints(&before), fingerprints(&after));
    assert_eq!(store.list_runs(10).expect("runs").len(), 2);
}

#[test]
fn broken_brand_table_aborts_without_committing() {
    let temp = init_workspace();
    let workspace = temp.path();
    let feed = write_feed(workspace, "first.jsonl", FIRST_FEED);

    fs::write(
        brands_path(workspace),
        r#"
[[brands]]
slug = "acme"
display_name = "Acme"

[[brands]]
slug = "Acme"
display_name = "Acme Pet"
"#,
    )
    .expect("write duplicate brand table");
    let err = run_once(
        workspace,
        &RunOptions {
            inputs: vec![feed.clone()],
            run_id: None,
        },
    )
    .expect_err("duplicate slug");
    assert!(matches!(err, RunError::BrandTable(_)));

    fs::write(brands_path(workspace), "[[brands]\nslug = ").expect("write broken toml");
    let err = run_once(
        workspace,
        &RunOptions {
            inputs: vec![feed],
            run_id: None,
        },
    )
    .expect_err("unparseable table");
    assert!(matches!(err, RunError::Config(_)));
    assert!(err.to_string().starts_with("run aborted"));

    let store = SqliteStore::open(workspace).expect("store");
    assert!(store.list_products().expect("products").is_empty());
    assert!(store.list_contributions().expect("contributions").is_empty());
    assert!(store.list_runs(10).expect("runs").is_empty());
}

#[test]
fn missing_input_file_aborts_the_run() {
    let temp = init_workspace();
    let err = run_once(
        temp.path(),
        &RunOptions {
            inputs: vec![temp.path().join("nowhere.jsonl")],
            run_id: None,
        },
    )
    .expect_err("missing input");
    assert!(matches!(err, RunError::Input { .. }));
}
