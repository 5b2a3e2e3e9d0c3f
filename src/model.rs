use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::amount::parse_float;

pub const MAX_FORMS_PER_SITE: usize = 3;
pub const MAX_SITES: usize = 5;
pub const DEFAULT_SITE_NAME: &str = "Default Site";

/// Literal accepted in `retraitPayee` meaning "paid in full".
pub const OK_TOKEN: &str = "OK";

/// Placeholder result that carries no information.
pub const EMPTY_RESULT_SENTINEL: &str = "Total: 0.0";

// Seed rows share a fixed id so that a reset form is always identical.
const SEED_ROW_ID: &str = "1";

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn seed_row_id() -> String {
    SEED_ROW_ID.to_string()
}

// ==========================================
// Enums
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteColor {
    #[default]
    None,
    Blue,
    Green,
    Yellow,
    Red,
    Purple,
}

impl SiteColor {
    pub const ALL: [SiteColor; 6] = [
        SiteColor::None,
        SiteColor::Blue,
        SiteColor::Green,
        SiteColor::Yellow,
        SiteColor::Red,
        SiteColor::Purple,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SiteColor::None => "none",
            SiteColor::Blue => "blue",
            SiteColor::Green => "green",
            SiteColor::Yellow => "yellow",
            SiteColor::Red => "red",
            SiteColor::Purple => "purple",
        }
    }
}

impl fmt::Display for SiteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SiteColor::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown site color '{s}'"))
    }
}

/// Balance multiplier. Persisted as its decimal string; anything
/// unrecognised loads as the 1.1 default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Multiplier {
    One,
    #[default]
    OnePointOne,
    OnePointTwo,
    OnePointThree,
}

impl Multiplier {
    pub const ALL: [Multiplier; 4] = [
        Multiplier::One,
        Multiplier::OnePointOne,
        Multiplier::OnePointTwo,
        Multiplier::OnePointThree,
    ];

    pub fn factor(self) -> f64 {
        match self {
            Multiplier::One => 1.0,
            Multiplier::OnePointOne => 1.1,
            Multiplier::OnePointTwo => 1.2,
            Multiplier::OnePointThree => 1.3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Multiplier::One => "1",
            Multiplier::OnePointOne => "1.1",
            Multiplier::OnePointTwo => "1.2",
            Multiplier::OnePointThree => "1.3",
        }
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Multiplier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_float(s).ok_or_else(|| format!("invalid multiplier '{s}'"))?;
        Multiplier::ALL
            .into_iter()
            .find(|m| (m.factor() - value).abs() < 1e-9)
            .ok_or_else(|| format!("multiplier must be one of 1, 1.1, 1.2, 1.3 (got '{s}')"))
    }
}

impl From<String> for Multiplier {
    fn from(raw: String) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl From<Multiplier> for String {
    fn from(m: Multiplier) -> Self {
        m.as_str().to_string()
    }
}

/// Field keys that can carry an inline error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKey {
    Fond,
    SoldeALinstant,
    SoldeDeDebut,
    Credit,
    CreditPayee,
    Depense,
    Retrait,
}

impl ErrorKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKey::Fond => "fond",
            ErrorKey::SoldeALinstant => "soldeALinstant",
            ErrorKey::SoldeDeDebut => "soldeDeDebut",
            ErrorKey::Credit => "credit",
            ErrorKey::CreditPayee => "creditPayee",
            ErrorKey::Depense => "depense",
            ErrorKey::Retrait => "retrait",
        }
    }
}

impl fmt::Display for ErrorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldErrors(BTreeMap<ErrorKey, String>);

impl FieldErrors {
    pub fn set(&mut self, key: ErrorKey, message: impl Into<String>) {
        self.0.insert(key, message.into());
    }

    pub fn clear(&mut self, key: ErrorKey) {
        self.0.remove(&key);
    }

    pub fn clear_all(&mut self) {
        self.0.clear();
    }

    pub fn get(&self, key: ErrorKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ErrorKey, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Scalar inputs of a form that can be edited directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    Fond,
    SoldeALinstant,
    SoldeDeDebut,
    Multiplier,
}

impl FromStr for ScalarField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "fond" => Ok(ScalarField::Fond),
            "soldealinstant" => Ok(ScalarField::SoldeALinstant),
            "soldededebut" => Ok(ScalarField::SoldeDeDebut),
            "multiplier" => Ok(ScalarField::Multiplier),
            _ => Err(format!("unknown field '{s}'")),
        }
    }
}

// ==========================================
// Rows
// ==========================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditRow {
    #[serde(default = "seed_row_id")]
    pub id: String,
    #[serde(default)]
    pub total_client: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub client: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreditPayeeRow {
    #[serde(default = "seed_row_id")]
    pub id: String,
    #[serde(default)]
    pub total_payee: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub client: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepenseRow {
    #[serde(default = "seed_row_id")]
    pub id: String,
    #[serde(default)]
    pub total_depense: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub client: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetraitRow {
    #[serde(default = "seed_row_id")]
    pub id: String,
    #[serde(default)]
    pub retrait_payee: String,
    #[serde(default)]
    pub retrait: String,
    #[serde(default)]
    pub client: String,
}

macro_rules! blank_row {
    ($row:ident { $($field:ident),+ }) => {
        impl $row {
            pub fn with_id(id: String) -> Self {
                Self { id, $($field: String::new()),+ }
            }

            pub fn seed() -> Self {
                Self::with_id(seed_row_id())
            }
        }
    };
}

blank_row!(CreditRow { total_client, details, client });
blank_row!(CreditPayeeRow { total_payee, details, client });
blank_row!(DepenseRow { total_depense, details, client });
blank_row!(RetraitRow { retrait_payee, retrait, client });

// ==========================================
// Forms & Sites
// ==========================================

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerForm {
    pub id: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub credit_rows: Vec<CreditRow>,
    #[serde(default)]
    pub credit_payee_rows: Vec<CreditPayeeRow>,
    #[serde(default)]
    pub depense_rows: Vec<DepenseRow>,
    #[serde(default)]
    pub retrait_rows: Vec<RetraitRow>,
    #[serde(default)]
    pub fond: String,
    #[serde(default)]
    pub solde_a_linstant: String,
    #[serde(default)]
    pub solde_de_debut: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub multiplier: Multiplier,
    #[serde(default)]
    pub site_color: SiteColor,
    #[serde(default, deserialize_with = "history_entries")]
    pub calculation_history: Vec<LedgerForm>,
}

/// Older blobs stored history as plain strings; only full snapshots are kept.
fn history_entries<'de, D>(deserializer: D) -> Result<Vec<LedgerForm>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

impl LedgerForm {
    /// A blank form: one seed row per kind, blank scalars, multiplier 1.1.
    pub fn empty(site: &str, site_color: SiteColor, timestamp: String) -> Self {
        Self {
            id: new_id(),
            result: String::new(),
            timestamp,
            credit_rows: vec![CreditRow::seed()],
            credit_payee_rows: vec![CreditPayeeRow::seed()],
            depense_rows: vec![DepenseRow::seed()],
            retrait_rows: vec![RetraitRow::seed()],
            fond: String::new(),
            solde_a_linstant: String::new(),
            solde_de_debut: String::new(),
            site: site.to_string(),
            multiplier: Multiplier::default(),
            site_color,
            calculation_history: Vec::new(),
        }
    }

    /// Restores the one-row-per-kind invariant on loaded data.
    pub fn ensure_rows(&mut self) {
        if self.credit_rows.is_empty() {
            self.credit_rows.push(CreditRow::seed());
        }
        if self.credit_payee_rows.is_empty() {
            self.credit_payee_rows.push(CreditPayeeRow::seed());
        }
        if self.depense_rows.is_empty() {
            self.depense_rows.push(DepenseRow::seed());
        }
        if self.retrait_rows.is_empty() {
            self.retrait_rows.push(RetraitRow::seed());
        }
    }

    /// Blanks every input and the result, keeping identity, site and history.
    pub fn clear_inputs(&mut self) {
        self.credit_rows = vec![CreditRow::seed()];
        self.credit_payee_rows = vec![CreditPayeeRow::seed()];
        self.depense_rows = vec![DepenseRow::seed()];
        self.retrait_rows = vec![RetraitRow::seed()];
        self.fond.clear();
        self.solde_a_linstant.clear();
        self.solde_de_debut.clear();
        self.multiplier = Multiplier::default();
        self.result.clear();
    }

    /// Copies rows, scalars and result from `other`; history is left alone.
    pub fn copy_inputs_from(&mut self, other: &LedgerForm) {
        self.credit_rows = other.credit_rows.clone();
        self.credit_payee_rows = other.credit_payee_rows.clone();
        self.depense_rows = other.depense_rows.clone();
        self.retrait_rows = other.retrait_rows.clone();
        self.fond = other.fond.clone();
        self.solde_a_linstant = other.solde_a_linstant.clone();
        self.solde_de_debut = other.solde_de_debut.clone();
        self.multiplier = other.multiplier;
        self.result = other.result.clone();
        self.ensure_rows();
    }

    /// Deep copy suitable for `calculation_history`.
    pub fn snapshot(&self) -> LedgerForm {
        LedgerForm {
            calculation_history: Vec::new(),
            ..self.clone()
        }
    }

    pub fn scalar(&self, field: ScalarField) -> String {
        match field {
            ScalarField::Fond => self.fond.clone(),
            ScalarField::SoldeALinstant => self.solde_a_linstant.clone(),
            ScalarField::SoldeDeDebut => self.solde_de_debut.clone(),
            ScalarField::Multiplier => self.multiplier.to_string(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.credit_rows.len()
            + self.credit_payee_rows.len()
            + self.depense_rows.len()
            + self.retrait_rows.len()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    #[serde(default)]
    pub last_updated: String,
}

fn default_site_name() -> String {
    DEFAULT_SITE_NAME.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Site {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default)]
    pub color: SiteColor,
    #[serde(default)]
    pub forms: Vec<LedgerForm>,
    #[serde(default)]
    pub statistics: SiteStatistics,
}

impl Site {
    pub fn new(name: &str, timestamp: String) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            color: SiteColor::None,
            forms: vec![LedgerForm::empty(name, SiteColor::None, timestamp.clone())],
            statistics: SiteStatistics {
                last_updated: timestamp,
            },
        }
    }

    pub fn touch(&mut self, timestamp: String) {
        self.statistics.last_updated = timestamp;
    }

    /// Restores the one-form-per-site and row invariants on loaded data.
    pub fn ensure_forms(&mut self, timestamp: &str) {
        if self.forms.is_empty() {
            self.forms
                .push(LedgerForm::empty(&self.name, self.color, timestamp.to_string()));
        }
        for form in &mut self.forms {
            form.ensure_rows();
        }
    }
}

/// Partial update applied by `SiteStore::update_site`.
#[derive(Debug, Clone, Default)]
pub struct SitePatch {
    pub name: Option<String>,
    pub color: Option<SiteColor>,
}
