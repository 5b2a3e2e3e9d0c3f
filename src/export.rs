//! Read-only exports of a form: the plain-text share summary and a Typst
//! document compiled to PDF or PNG.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::Serialize;
use slug::slugify;
use tera::{Context, Tera};
use tracing::info;

use crate::amount::format_value;
use crate::error::{LedgerError, Result};
use crate::model::LedgerForm;

const SUMMARY_TEMPLATE: &str = include_str!("../templates/summary.tera");
const SNAPSHOT_TEMPLATE: &str = include_str!("../templates/snapshot.typ.tera");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Image,
    Pdf,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Image => "png",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Text => "text",
            ExportFormat::Image => "image",
            ExportFormat::Pdf => "pdf",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ExportFormat::Text),
            "image" | "png" => Ok(ExportFormat::Image),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

// ==========================================
// Template context
// ==========================================

#[derive(Serialize)]
struct RowEntry {
    client: String,
    details: String,
    total: String,
}

#[derive(Serialize)]
struct RetraitEntry {
    retrait: String,
    payee: String,
    client: String,
}

#[derive(Serialize)]
struct Section {
    title: &'static str,
    rows: Vec<RowEntry>,
}

#[derive(Serialize)]
struct SnapshotContext {
    rule: String,
    site: String,
    date: String,
    result: String,
    multiplier: String,
    fond: String,
    solde_a_linstant: String,
    solde_de_debut: String,
    sections: Vec<Section>,
    retraits: Vec<RetraitEntry>,
}

fn local_date(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|at| at.with_timezone(&Local).format("%d/%m/%Y %H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

impl SnapshotContext {
    /// `text` is applied to every user-entered string before it reaches the
    /// template.
    fn build(form: &LedgerForm, text: fn(&str) -> String) -> Self {
        let value = |raw: &str| text(&format_value(raw));
        let entry = |client: &str, details: &str, total: &str| RowEntry {
            client: text(client),
            details: text(details),
            total: value(total),
        };

        let solde_a_linstant = if form.solde_a_linstant.is_empty() {
            "0".to_string()
        } else {
            text(&form.solde_a_linstant)
        };

        Self {
            rule: "-".repeat(40),
            site: text(&form.site),
            date: text(&local_date(&form.timestamp)),
            result: text(&form.result),
            multiplier: form.multiplier.to_string(),
            fond: value(&form.fond),
            solde_a_linstant,
            solde_de_debut: value(&form.solde_de_debut),
            sections: vec![
                Section {
                    title: "CRÉDIT DETAILS",
                    rows: form
                        .credit_rows
                        .iter()
                        .map(|r| entry(&r.client, &r.details, &r.total_client))
                        .collect(),
                },
                Section {
                    title: "CRÉDIT PAYÉE DETAILS",
                    rows: form
                        .credit_payee_rows
                        .iter()
                        .map(|r| entry(&r.client, &r.details, &r.total_payee))
                        .collect(),
                },
                Section {
                    title: "DÉPENSE DETAILS",
                    rows: form
                        .depense_rows
                        .iter()
                        .map(|r| entry(&r.client, &r.details, &r.total_depense))
                        .collect(),
                },
            ],
            retraits: form
                .retrait_rows
                .iter()
                .map(|r| RetraitEntry {
                    retrait: value(&r.retrait),
                    payee: text(&r.retrait_payee),
                    client: text(&r.client),
                })
                .collect(),
        }
    }
}

fn verbatim(s: &str) -> String {
    s.to_string()
}

/// Escapes Typst markup characters in user text.
fn typst_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '\\' | '#' | '*' | '_' | '$' | '@' | '<' | '>' | '[' | ']' | '`' | '~' | '=' | '-' | '+' | '/'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn render(name: &str, template: &str, context: &SnapshotContext) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template(name, template)?;
    let context = Context::from_serialize(context)?;
    Ok(tera.render(name, &context)?)
}

// ==========================================
// Public API
// ==========================================

/// The plain-text share summary of a form.
pub fn render_text(form: &LedgerForm) -> Result<String> {
    let context = SnapshotContext::build(form, verbatim);
    let rendered = render("summary.tera", SUMMARY_TEMPLATE, &context)?;
    Ok(rendered.trim().to_string())
}

/// Typst source for the PDF and image exports.
pub fn render_typst(form: &LedgerForm) -> Result<String> {
    let context = SnapshotContext::build(form, typst_escape);
    render("snapshot.typ", SNAPSHOT_TEMPLATE, &context)
}

/// `<site>-<timestamp>.<ext>`, slugified.
pub fn file_name(form: &LedgerForm, format: ExportFormat) -> String {
    let site = if form.site.trim().is_empty() {
        "form"
    } else {
        form.site.as_str()
    };
    format!(
        "{}.{}",
        slugify(format!("{} {}", site, form.timestamp)),
        format.extension()
    )
}

fn typst_available() -> bool {
    Command::new("typst").arg("--version").output().is_ok()
}

/// Writes the export to `out_dir` and returns its path. The form is not
/// modified.
pub fn export_snapshot(form: &LedgerForm, format: ExportFormat, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(file_name(form, format));

    match format {
        ExportFormat::Text => {
            fs::write(&path, render_text(form)?)?;
        }
        ExportFormat::Image | ExportFormat::Pdf => {
            if !typst_available() {
                return Err(LedgerError::Unsupported(
                    "'typst' is not installed, only text export is available".to_string(),
                ));
            }
            let typ_path = path.with_extension("typ");
            fs::write(&typ_path, render_typst(form)?)?;

            let status = Command::new("typst")
                .arg("compile")
                .arg(&typ_path)
                .arg(&path)
                .status()?;
            fs::remove_file(&typ_path).ok();
            if !status.success() {
                return Err(LedgerError::Io(std::io::Error::other(format!(
                    "typst compile exited with {status}"
                ))));
            }
        }
    }

    info!(path = %path.display(), %format, "snapshot exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SiteColor;

    fn sample() -> LedgerForm {
        let mut form = LedgerForm::empty("Marché Nord", SiteColor::Blue, "2024-03-01T10:00:00.000Z".into());
        form.result = "Total: 82.4".into();
        form.fond = "5".into();
        form.solde_de_debut = "100".into();
        form.credit_rows[0].client = "Ali".into();
        form.credit_rows[0].details = "4+6".into();
        form.credit_rows[0].total_client = "10.0".into();
        form.retrait_rows[0].retrait = "4+1".into();
        form.retrait_rows[0].retrait_payee = "OK".into();
        form
    }

    #[test]
    fn text_summary_lists_every_section() {
        let text = render_text(&sample()).unwrap();
        assert!(text.starts_with("Generated via Calculator App"));
        assert!(text.contains("Final Result: Total: 82.4"));
        assert!(text.contains("Fond: 5.0"));
        assert!(text.contains("Solde à l'instant: 0"));
        assert!(text.contains("Solde de début: 100.0"));
        for title in ["CRÉDIT DETAILS", "CRÉDIT PAYÉE DETAILS", "DÉPENSE DETAILS", "RETRAIT DETAILS"] {
            assert!(text.contains(title), "missing {title}");
        }
        assert!(text.contains("1. Client: Ali"));
        assert!(text.contains("Details: 4+6"));
        assert!(text.contains("1. Retrait: 4+1"));
        assert!(text.contains("Payée: OK"));
    }

    #[test]
    fn typst_source_escapes_markup() {
        let mut form = sample();
        form.credit_rows[0].client = "#1 client".into();
        let source = render_typst(&form).unwrap();
        assert!(source.contains(r"\#1 client"));
        assert!(source.contains("== CRÉDIT DETAILS"));
    }

    #[test]
    fn file_names_are_slugs() {
        let name = file_name(&sample(), ExportFormat::Pdf);
        assert!(name.starts_with("marche-nord-2024-03-01"));
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn text_export_writes_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = export_snapshot(&sample(), ExportFormat::Text, dir.path()).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("BASIC INFORMATION"));
    }
}
