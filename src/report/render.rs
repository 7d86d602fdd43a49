//! Plain-text and JSON rendering of report views.

use anyhow::{Context, Result};
use prettytable::{format, Cell, Row, Table};
use serde::Serialize;
use std::fmt::Write;

use super::dashboard::Dashboard;
use super::league::LeagueEntry;
use super::listings::{ListingDetail, ListingRow};
use super::products::ProductSummary;
use super::Totals;
use crate::ingest::NormalizedBatch;
use crate::model::Metric;
use crate::store::{BatchRecord, ReconcileSummary};
use crate::upload::UploadOutcome;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serializing output")
}

fn group_thousands(int_part: &str) -> String {
    let mut out = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn grouped(v: f64, decimals: usize) -> String {
    let s = format!("{:.*}", decimals, v.abs());
    let (int_part, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s.as_str(), None),
    };
    let mut out = String::new();
    if v < 0.0 && s.chars().any(|c| c.is_ascii_digit() && c != '0') {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if let Some(f) = frac {
        out.push('.');
        out.push_str(f);
    }
    out
}

/// `1234` → `1,234`; non-integers keep two decimals.
pub fn fmt_count(v: f64) -> String {
    if v.fract() == 0.0 {
        grouped(v, 0)
    } else {
        grouped(v, 2)
    }
}

pub fn fmt_money(v: f64) -> String {
    grouped(v, 2)
}

/// Fraction → percentage, `0.032` → `3.20%`.
pub fn fmt_pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

fn fmt_metric(metric: Metric, v: f64) -> String {
    match metric {
        m if m.is_ratio() => fmt_pct(v),
        Metric::Sales => fmt_money(v),
        _ => fmt_count(v),
    }
}

fn fmt_delta(v: f64, f: fn(f64) -> String) -> String {
    if v > 0.0 {
        format!("+{}", f(v))
    } else {
        f(v)
    }
}

/// Borderless table with a rule under the titles. Titles marked `true`
/// head right-aligned columns.
fn new_table(titles: &[(&str, bool)]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(Row::new(
        titles
            .iter()
            .map(|(t, right)| Cell::new(t).style_spec(if *right { "br" } else { "b" }))
            .collect(),
    ));
    table
}

fn num(s: String) -> Cell {
    Cell::new(&s).style_spec("r")
}

fn text(s: &str) -> Cell {
    Cell::new(s)
}

fn totals_lines(out: &mut String, t: &Totals) {
    let _ = writeln!(out, "  Listings      {}", t.listings);
    let _ = writeln!(out, "  Impressions   {}", fmt_count(t.impressions));
    let _ = writeln!(out, "  Page views    {}", fmt_count(t.page_views));
    let _ = writeln!(out, "  Sold          {}", fmt_count(t.sold));
    let _ = writeln!(out, "  Sales         {}", fmt_money(t.sales));
    let _ = writeln!(out, "  CTR           {}", fmt_pct(t.ctr));
    let _ = writeln!(out, "  Conversion    {}", fmt_pct(t.conversion));
    let _ = writeln!(out, "  Mean CTR      {}", fmt_pct(t.mean_ctr));
}

pub fn dashboard(d: &Dashboard) -> String {
    let Some(period) = &d.period else {
        return "No data imported yet.\n".to_string();
    };
    let mut out = String::new();
    let _ = writeln!(out, "Period {}", period);
    totals_lines(&mut out, &d.totals);
    if let Some(prev) = &d.previous {
        let _ = writeln!(
            out,
            "  vs {}: impressions {}, page views {}, sales {}",
            prev.period,
            fmt_delta(d.totals.impressions - prev.totals.impressions, fmt_count),
            fmt_delta(d.totals.page_views - prev.totals.page_views, fmt_count),
            fmt_delta(d.totals.sales - prev.totals.sales, fmt_money),
        );
    }

    if !d.series.is_empty() {
        out.push('\n');
        let mut table = new_table(&[
            ("Period", false),
            ("Listings", true),
            ("Impressions", true),
            ("Page views", true),
            ("CTR", true),
            ("Sold", true),
            ("Sales", true),
        ]);
        for p in &d.series {
            table.add_row(Row::new(vec![
                text(&p.period),
                num(p.totals.listings.to_string()),
                num(fmt_count(p.totals.impressions)),
                num(fmt_count(p.totals.page_views)),
                num(fmt_pct(p.totals.ctr)),
                num(fmt_count(p.totals.sold)),
                num(fmt_money(p.totals.sales)),
            ]));
        }
        out.push_str(&table.to_string());
    }
    out
}

pub fn league(entries: &[LeagueEntry], metric: Metric, period: &str) -> String {
    let mut out = format!("League table by {} for {}\n", metric.label(), period);
    let mut table = new_table(&[
        ("#", true),
        ("Item ID", false),
        ("Title", false),
        (metric.label(), true),
        ("Impressions", true),
        ("CTR", true),
        ("Sold", true),
    ]);
    for e in entries {
        table.add_row(Row::new(vec![
            num(e.rank.to_string()),
            text(&e.item_id),
            text(&e.title),
            num(fmt_metric(metric, e.value)),
            num(fmt_count(e.metrics.total_impressions)),
            num(fmt_pct(e.metrics.ctr)),
            num(fmt_count(e.metrics.quantity_sold)),
        ]));
    }
    out.push_str(&table.to_string());
    out
}

pub fn listings(rows: &[ListingRow]) -> String {
    let mut table = new_table(&[
        ("Item ID", false),
        ("Title", false),
        ("Category", false),
        ("Product", false),
        ("Last seen", false),
    ]);
    for r in rows {
        let info = &r.record.info;
        table.add_row(Row::new(vec![
            text(&info.item_id),
            text(&info.title),
            text(&info.category),
            text(r.product_name.as_deref().unwrap_or("-")),
            text(&r.record.last_seen.format("%Y-%m-%d").to_string()),
        ]));
    }
    table.to_string()
}

pub fn listing_detail(d: &ListingDetail) -> String {
    let info = &d.record.info;
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", info.title, info.item_id);
    let _ = writeln!(out, "  Category      {}", info.category);
    let _ = writeln!(out, "  Promoted      {}", info.promoted_status);
    let _ = writeln!(
        out,
        "  Started       {}",
        info.start_date.format("%Y-%m-%d")
    );
    let _ = writeln!(
        out,
        "  Product       {}",
        d.product_name.as_deref().unwrap_or("-")
    );
    let _ = writeln!(
        out,
        "  Seen          {} .. {}",
        d.record.first_seen.format("%Y-%m-%d"),
        d.record.last_seen.format("%Y-%m-%d")
    );
    out.push('\n');

    let mut table = new_table(&[
        ("Period", false),
        ("Impressions", true),
        ("Δ", true),
        ("Page views", true),
        ("CTR", true),
        ("Conversion", true),
        ("Sold", true),
        ("Sales", true),
        ("Δ", true),
    ]);
    for p in &d.history {
        let m = &p.metrics;
        table.add_row(Row::new(vec![
            text(&p.period),
            num(fmt_count(m.total_impressions)),
            num(p
                .change
                .map(|c| fmt_delta(c.impressions, fmt_count))
                .unwrap_or_default()),
            num(fmt_count(m.total_page_views)),
            num(fmt_pct(m.ctr)),
            num(fmt_pct(m.conversion_rate)),
            num(fmt_count(m.quantity_sold)),
            num(fmt_money(m.total_sales)),
            num(p
                .change
                .map(|c| fmt_delta(c.sales, fmt_money))
                .unwrap_or_default()),
        ]));
    }
    out.push_str(&table.to_string());
    out
}

pub fn products(summaries: &[ProductSummary], period: Option<&str>) -> String {
    let mut out = match period {
        Some(p) => format!("Products for {}\n", p),
        None => "Products\n".to_string(),
    };
    let mut table = new_table(&[
        ("ID", true),
        ("Name", false),
        ("Members", true),
        ("Impressions", true),
        ("Page views", true),
        ("CTR", true),
        ("Conversion", true),
        ("Sold", true),
        ("Sales", true),
    ]);
    for s in summaries {
        let t = &s.totals;
        table.add_row(Row::new(vec![
            num(s.product.id.to_string()),
            text(&s.product.name),
            num(s.product.members.to_string()),
            num(fmt_count(t.impressions)),
            num(fmt_count(t.page_views)),
            num(fmt_pct(t.ctr)),
            num(fmt_pct(t.conversion)),
            num(fmt_count(t.sold)),
            num(fmt_money(t.sales)),
        ]));
    }
    out.push_str(&table.to_string());
    out
}

pub fn batches(batches: &[BatchRecord]) -> String {
    let mut table = new_table(&[
        ("ID", true),
        ("Upload", false),
        ("Period", false),
        ("Imported", false),
        ("Rows", true),
        ("Kept", true),
        ("Skipped", true),
        ("Snapshots", true),
    ]);
    for b in batches {
        table.add_row(Row::new(vec![
            num(b.id.to_string()),
            text(&b.upload_name),
            text(&b.period),
            text(&b.imported_at.format("%Y-%m-%d %H:%M").to_string()),
            num(b.rows_total.to_string()),
            num(b.rows_imported.to_string()),
            num(b.rows_skipped.to_string()),
            num(b.snapshots.to_string()),
        ]));
    }
    table.to_string()
}

/// First `n` normalized rows plus every skipped row.
pub fn preview(batch: &NormalizedBatch, n: usize) -> String {
    let mut table = new_table(&[
        ("Line", true),
        ("Item ID", false),
        ("Title", false),
        ("Started", false),
        ("Impressions", true),
        ("CTR", true),
        ("Page views", true),
        ("Sold", true),
        ("Sales", true),
    ]);
    for r in batch.rows.iter().take(n) {
        let m = &r.metrics;
        let started = if r.start_date_fallback {
            "?".to_string()
        } else {
            r.listing.start_date.format("%Y-%m-%d").to_string()
        };
        table.add_row(Row::new(vec![
            num(r.line.to_string()),
            text(&r.listing.item_id),
            text(&r.listing.title),
            text(&started),
            num(fmt_count(m.total_impressions)),
            num(fmt_pct(m.ctr)),
            num(fmt_count(m.total_page_views)),
            num(fmt_count(m.quantity_sold)),
            num(fmt_money(m.total_sales)),
        ]));
    }
    let mut out = table.to_string();
    if batch.rows.len() > n {
        let _ = writeln!(out, "... {} more rows", batch.rows.len() - n);
    }
    for s in &batch.skipped {
        let _ = writeln!(out, "skipped line {}: {}", s.line, s.reason);
    }
    out
}

pub fn import_summary(
    upload: &str,
    period: &str,
    batch: &NormalizedBatch,
    s: &ReconcileSummary,
) -> String {
    format!(
        "{upload} → batch {} ({period}): {} rows, {} skipped, {} duplicates, {} date fallbacks\n  \
         listings: {} new, {} updated, {} unchanged\n  \
         snapshots: {} new, {} updated, {} unchanged\n",
        s.batch_id,
        batch.rows.len(),
        batch.skipped_count(),
        batch.duplicates,
        batch.date_fallbacks,
        s.listings_inserted,
        s.listings_updated,
        s.listings_unchanged,
        s.snapshots_inserted,
        s.snapshots_updated,
        s.snapshots_unchanged,
    )
}

/// Text report for one upload of an import run. Imported and dry-run
/// uploads show their first `preview_rows` rows.
pub fn upload_outcome(o: &UploadOutcome, preview_rows: usize) -> String {
    match o {
        UploadOutcome::Imported {
            name,
            period,
            batch,
            summary,
        } => format!(
            "{}{}",
            import_summary(name, period, batch, summary),
            preview(batch, preview_rows)
        ),
        UploadOutcome::Previewed {
            name,
            period,
            batch,
        } => format!(
            "{} ({}): {} rows, {} skipped (dry run)\n{}",
            name,
            period,
            batch.rows.len(),
            batch.skipped_count(),
            preview(batch, preview_rows)
        ),
        UploadOutcome::AlreadyImported { name } => format!(
            "{}: already imported, skipped (use --force to re-import)\n",
            name
        ),
        UploadOutcome::Failed { name, error } => format!("{}: FAILED: {}\n", name, error),
    }
}
