use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use larder_config::{
    brands_path, config_path, ensure_workspace_config, load_workspace_config, validate_config,
};
use larder_core::{CanonicalProduct, slugify};
use larder_publish::{
    AllowlistAction, AllowlistService, AuditEntry, BrandAllowlistEntry, PublishedProduct,
    PublishedViews, TransitionRequest, ViewPublisher,
};
use larder_quality::{BrandQualityReport, rank_by_effort, score, score_all};
use larder_store::SqliteStore;
use serde::Serialize;

use crate::cli::{AllowlistCommand, OutputFormat, RunArgs, ScoreArgs, TransitionArgs, ViewsArgs};
use crate::engine::{RunOptions, RunReport, current_unix_timestamp_millis, run_once};

pub fn run_init_command(workspace: &Path, out: &mut dyn Write) -> Result<()> {
    let config = ensure_workspace_config(workspace)
        .with_context(|| format!("failed to initialize workspace {}", workspace.display()))?;
    writeln!(out, "config\t{}", config_path(workspace).display())?;
    writeln!(out, "brands\t{}", brands_path(workspace).display())?;
    for warning in validate_config(&config) {
        writeln!(out, "warning\t{}\t{}", warning.code, warning.message)?;
    }
    Ok(())
}

pub fn run_run_command(
    workspace: &Path,
    args: RunArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let report = run_once(
        workspace,
        &RunOptions {
            inputs: args.inputs,
            run_id: args.run_id,
        },
    )?;

    match format {
        OutputFormat::Table => write_run_report(&report, out)?,
        OutputFormat::Json => write_json(&report, out)?,
    }
    Ok(())
}

pub fn write_run_report(report: &RunReport, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "run_id\t{}", report.run_id)?;
    writeln!(out, "brand_table_version\t{}", report.brand_table_version)?;
    writeln!(out, "records_in\t{}", report.records_in)?;
    writeln!(out, "adapted\t{}", report.adapted)?;
    writeln!(out, "linked\t{}", report.linked)?;
    writeln!(out, "duplicates\t{}", report.duplicates)?;
    writeln!(out, "orphaned\t{}", report.orphaned)?;
    writeln!(out, "products_created\t{}", report.products_created.len())?;
    writeln!(out, "products_updated\t{}", report.products_updated.len())?;
    writeln!(out, "products_unchanged\t{}", report.products_unchanged)?;

    if !report.residuals.is_empty() {
        writeln!(out)?;
        writeln!(out, "kind\tsource_id\trow_ref\treason")?;
        for residual in &report.residuals {
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                residual.kind.as_str(),
                normalize_field(&residual.source_id),
                normalize_field(&residual.row_ref),
                normalize_field(&residual.reason)
            )?;
        }
    }

    Ok(())
}

pub fn run_score_command(
    workspace: &Path,
    args: ScoreArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let config = load_workspace_config(workspace).context("failed to load workspace config")?;
    let products = stored_products(workspace)?;

    let reports = match args.brand.as_deref() {
        Some(brand) => vec![score(&products, &slugify(brand), &config.quality)],
        None => score_all(&products, &config.quality),
    };
    let ordered = if args.by_effort {
        rank_by_effort(&reports)
    } else {
        reports.iter().collect()
    };

    match format {
        OutputFormat::Table => write_quality_reports(&ordered, out)?,
        OutputFormat::Json => write_json(&ordered, out)?,
    }
    Ok(())
}

pub fn write_quality_reports(
    reports: &[&BrandQualityReport],
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(
        out,
        "brand_slug\tproducts\tform_cov\tlife_stage_cov\tingredients_cov\tkcal_valid_pct\tprice_bucket_cov\tkcal_outliers\tcompletion_pct\tstatus\tfailing"
    )?;

    for report in reports {
        let coverage = &report.coverage;
        let failing = report
            .failing
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        writeln!(
            out,
            "{}\t{}\t{:.1}\t{:.1}\t{:.1}\t{:.1}\t{:.1}\t{}\t{:.1}\t{}\t{}",
            report.brand_slug,
            report.product_count,
            coverage.form_cov,
            coverage.life_stage_cov,
            coverage.ingredients_cov,
            coverage.kcal_valid_pct,
            coverage.price_bucket_cov,
            report.kcal_outliers,
            report.completion_pct,
            report.status.as_str(),
            failing
        )?;
    }

    Ok(())
}

pub fn run_allowlist_command(
    workspace: &Path,
    command: AllowlistCommand,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let service = AllowlistService::new(workspace);
    let (action, args) = match command {
        AllowlistCommand::Add(args) => (AllowlistAction::Add, args),
        AllowlistCommand::Promote(args) => (AllowlistAction::Promote, args),
        AllowlistCommand::Pause(args) => (AllowlistAction::Pause, args),
        AllowlistCommand::Reactivate(args) => (AllowlistAction::Reactivate, args),
        AllowlistCommand::Remove(args) => (AllowlistAction::Remove, args),
        AllowlistCommand::Show(filter) => {
            let entries: Vec<BrandAllowlistEntry> = match filter.brand.as_deref() {
                Some(brand) => service
                    .entry(&slugify(brand))
                    .context("failed to read allowlist entry")?
                    .into_iter()
                    .collect(),
                None => service.entries().context("failed to read allowlist")?,
            };
            return match format {
                OutputFormat::Table => Ok(write_allowlist_entries(&entries, out)?),
                OutputFormat::Json => write_json(&entries, out),
            };
        }
        AllowlistCommand::Audit(filter) => {
            let brand = filter.brand.as_deref().map(slugify);
            let history = service
                .audit(brand.as_deref())
                .context("failed to read allowlist audit log")?;
            return match format {
                OutputFormat::Table => Ok(write_audit_entries(&history, out)?),
                OutputFormat::Json => write_json(&history, out),
            };
        }
    };

    let entry = apply_transition(workspace, &service, action, args)?;
    match format {
        OutputFormat::Table => write_allowlist_entries(std::slice::from_ref(&entry), out)?,
        OutputFormat::Json => write_json(&entry, out)?,
    }
    Ok(())
}

fn apply_transition(
    workspace: &Path,
    service: &AllowlistService,
    action: AllowlistAction,
    args: TransitionArgs,
) -> Result<BrandAllowlistEntry> {
    let config = load_workspace_config(workspace).context("failed to load workspace config")?;
    let brand_slug = slugify(&args.brand);

    let expected_revision = match args.expected_revision {
        Some(revision) => Some(revision),
        None => service
            .entry(&brand_slug)
            .context("failed to read allowlist entry")?
            .map(|entry| entry.revision),
    };
    let report = if action.needs_quality_report() {
        let products = stored_products(workspace)?;
        Some(score(&products, &brand_slug, &config.quality))
    } else {
        None
    };

    let request = TransitionRequest {
        brand_slug,
        action,
        actor: args.actor.unwrap_or(config.publish.default_actor),
        reason: args.reason,
        expected_revision,
    };
    let entry = service.apply(&request, report.as_ref(), current_unix_timestamp_millis())?;
    Ok(entry)
}

pub fn write_allowlist_entries(
    entries: &[BrandAllowlistEntry],
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(
        out,
        "brand_slug\tstatus\tquality_gate_passed\tcompletion_pct\tlast_validated\trevision"
    )?;
    for entry in entries {
        writeln!(
            out,
            "{}\t{}\t{}\t{:.1}\t{}\t{}",
            entry.brand_slug,
            entry.status.as_str(),
            entry.quality_gate_passed,
            entry.coverage.completion_pct(),
            entry.last_validated,
            entry.revision
        )?;
    }
    Ok(())
}

pub fn write_audit_entries(history: &[AuditEntry], out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        out,
        "seq\tbrand_slug\taction\told_status\tnew_status\tactor\treason\trevision\tcreated_at"
    )?;
    for entry in history {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            entry.seq,
            entry.brand_slug,
            entry.action.as_str(),
            entry.old_status.map_or("-", |status| status.as_str()),
            entry.new_status.as_str(),
            normalize_field(&entry.actor),
            normalize_field(&entry.reason),
            entry.revision,
            entry.created_at
        )?;
    }
    Ok(())
}

pub fn run_publish_command(
    workspace: &Path,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let products = stored_products(workspace)?;
    let publisher = ViewPublisher::open(workspace).context("failed to open view publisher")?;
    let views = publisher
        .publish(&products, current_unix_timestamp_millis())
        .context("failed to publish views")?;

    write_generation(&views, format, out)
}

pub fn run_rollback_command(
    workspace: &Path,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let publisher = ViewPublisher::open(workspace).context("failed to open view publisher")?;
    let views = publisher
        .rollback(current_unix_timestamp_millis())
        .context("failed to roll back views")?;

    write_generation(&views, format, out)
}

fn write_generation(views: &PublishedViews, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    match format {
        OutputFormat::Table => {
            writeln!(out, "generation\tcreated_at\tpreview\tproduction")?;
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                views.generation,
                views.created_at,
                views.preview.len(),
                views.production.len()
            )?;
        }
        OutputFormat::Json => write_json(
            &serde_json::json!({
                "generation": views.generation,
                "created_at": views.created_at,
                "preview": views.preview.len(),
                "production": views.production.len(),
            }),
            out,
        )?,
    }
    Ok(())
}

pub fn run_views_command(
    workspace: &Path,
    args: ViewsArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()> {
    let publisher = ViewPublisher::open(workspace).context("failed to open view publisher")?;
    let Some(views) = publisher.current().context("failed to read published views")? else {
        writeln!(out, "no published generation")?;
        return Ok(());
    };

    let products = views.view(args.kind);
    match format {
        OutputFormat::Table => write_view_products(products, out)?,
        OutputFormat::Json => write_json(&products, out)?,
    }
    Ok(())
}

pub fn write_view_products(
    products: &[PublishedProduct],
    out: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(
        out,
        "product_key\tproduct_name\tstatus\tlife_stage\tkcal_per_100g\tprice_bucket\tquality_score"
    )?;
    for entry in products {
        let product = &entry.product;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.3}",
            product.key,
            normalize_field(&product.product_name),
            entry.status.as_str(),
            product.life_stage.as_str(),
            product
                .kcal_per_100g
                .map_or_else(|| "-".to_owned(), |kcal| format!("{kcal:.1}")),
            product.price_bucket.map_or("-", |bucket| bucket.as_str()),
            product.quality_score
        )?;
    }
    Ok(())
}

fn stored_products(workspace: &Path) -> Result<Vec<CanonicalProduct>> {
    let store = SqliteStore::open(workspace).context("failed to initialize local store")?;
    store
        .list_products()
        .context("failed to list products")?
        .into_iter()
        .map(|row| {
            serde_json::from_str(&row.product_json)
                .with_context(|| format!("stored product {} is corrupt", row.product_key))
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(value: &T, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("failed to serialize JSON output")?;
    writeln!(out).context("failed to write trailing newline")?;
    Ok(())
}

fn normalize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
