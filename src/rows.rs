//! Row editing.
//!
//! Credit, credit-payee and dépense rows derive their total from the
//! `+`-joined amounts typed in `details`. Retrait rows track whether the
//! withdrawal was paid back in full (`"OK"`) or by an explicit amount.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::amount::{sum_additive, to_fixed1};
use crate::error::{LedgerError, Result};
use crate::model::{
    CreditPayeeRow, CreditRow, DepenseRow, LedgerForm, OK_TOKEN, RetraitRow, new_id,
};

static PAYEE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d*\.?\d*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Credit,
    CreditPayee,
    Depense,
    Retrait,
}

impl RowKind {
    pub const ALL: [RowKind; 4] = [
        RowKind::Credit,
        RowKind::CreditPayee,
        RowKind::Depense,
        RowKind::Retrait,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RowKind::Credit => "credit",
            RowKind::CreditPayee => "creditPayee",
            RowKind::Depense => "depense",
            RowKind::Retrait => "retrait",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RowKind::Credit => "Crédit",
            RowKind::CreditPayee => "Crédit payée",
            RowKind::Depense => "Dépense",
            RowKind::Retrait => "Retrait",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "credit" => Ok(RowKind::Credit),
            "creditpayee" => Ok(RowKind::CreditPayee),
            "depense" => Ok(RowKind::Depense),
            "retrait" => Ok(RowKind::Retrait),
            _ => Err(LedgerError::UnknownField(format!("row kind '{s}'"))),
        }
    }
}

/// Editable row fields. `Total` is the kind-specific total column of
/// credit-like rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowField {
    Total,
    Details,
    Client,
    Retrait,
    RetraitPayee,
}

impl FromStr for RowField {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "total" | "totalclient" | "totalpayee" | "totaldepense" => Ok(RowField::Total),
            "details" => Ok(RowField::Details),
            "client" => Ok(RowField::Client),
            "retrait" => Ok(RowField::Retrait),
            "retraitpayee" | "payee" => Ok(RowField::RetraitPayee),
            _ => Err(LedgerError::UnknownField(format!("row field '{s}'"))),
        }
    }
}

/// Whether an edit changed the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Applied,
    Rejected,
}

impl Edit {
    pub fn applied(self) -> bool {
        self == Edit::Applied
    }
}

pub fn row_len(form: &LedgerForm, kind: RowKind) -> usize {
    match kind {
        RowKind::Credit => form.credit_rows.len(),
        RowKind::CreditPayee => form.credit_payee_rows.len(),
        RowKind::Depense => form.depense_rows.len(),
        RowKind::Retrait => form.retrait_rows.len(),
    }
}

pub fn add_row(form: &mut LedgerForm, kind: RowKind) {
    match kind {
        RowKind::Credit => form.credit_rows.push(CreditRow::with_id(new_id())),
        RowKind::CreditPayee => form.credit_payee_rows.push(CreditPayeeRow::with_id(new_id())),
        RowKind::Depense => form.depense_rows.push(DepenseRow::with_id(new_id())),
        RowKind::Retrait => form.retrait_rows.push(RetraitRow::with_id(new_id())),
    }
}

/// Removes a row. The last row of a kind always stays.
pub fn remove_row(form: &mut LedgerForm, kind: RowKind, index: usize) -> Result<Edit> {
    let len = row_len(form, kind);
    if index >= len {
        return Err(LedgerError::OutOfRange { what: "row", index });
    }
    if len <= 1 {
        return Ok(Edit::Rejected);
    }
    match kind {
        RowKind::Credit => {
            form.credit_rows.remove(index);
        }
        RowKind::CreditPayee => {
            form.credit_payee_rows.remove(index);
        }
        RowKind::Depense => {
            form.depense_rows.remove(index);
        }
        RowKind::Retrait => {
            form.retrait_rows.remove(index);
        }
    }
    Ok(Edit::Applied)
}

/// Total of a `details` expression, e.g. `"10+5.25"` gives `"15.3"`.
pub fn details_total(details: &str) -> String {
    to_fixed1(sum_additive(details))
}

fn unknown(kind: RowKind, field: RowField) -> LedgerError {
    LedgerError::UnknownField(format!("{kind} rows have no {field:?} field"))
}

fn out_of_range(index: usize) -> LedgerError {
    LedgerError::OutOfRange { what: "row", index }
}

/// Sets `field` of row `index` to `value`, keeping derived fields in step.
pub fn update_row(
    form: &mut LedgerForm,
    kind: RowKind,
    index: usize,
    field: RowField,
    value: &str,
) -> Result<Edit> {
    match kind {
        RowKind::Credit => {
            let row = form.credit_rows.get_mut(index).ok_or_else(|| out_of_range(index))?;
            match field {
                RowField::Details => {
                    row.total_client = details_total(value);
                    row.details = value.to_string();
                }
                RowField::Total => row.total_client = value.to_string(),
                RowField::Client => row.client = value.to_string(),
                _ => return Err(unknown(kind, field)),
            }
        }
        RowKind::CreditPayee => {
            let row = form.credit_payee_rows.get_mut(index).ok_or_else(|| out_of_range(index))?;
            match field {
                RowField::Details => {
                    row.total_payee = details_total(value);
                    row.details = value.to_string();
                }
                RowField::Total => row.total_payee = value.to_string(),
                RowField::Client => row.client = value.to_string(),
                _ => return Err(unknown(kind, field)),
            }
        }
        RowKind::Depense => {
            let row = form.depense_rows.get_mut(index).ok_or_else(|| out_of_range(index))?;
            match field {
                RowField::Details => {
                    row.total_depense = details_total(value);
                    row.details = value.to_string();
                }
                RowField::Total => row.total_depense = value.to_string(),
                RowField::Client => row.client = value.to_string(),
                _ => return Err(unknown(kind, field)),
            }
        }
        RowKind::Retrait => {
            let row = form.retrait_rows.get_mut(index).ok_or_else(|| out_of_range(index))?;
            match field {
                RowField::Retrait => {
                    row.retrait = value.to_string();
                    if row.retrait_payee.is_empty() || row.retrait_payee == OK_TOKEN {
                        row.retrait_payee = OK_TOKEN.to_string();
                    }
                }
                RowField::RetraitPayee => {
                    if value.eq_ignore_ascii_case("ok") {
                        row.retrait_payee = OK_TOKEN.to_string();
                    } else if PAYEE_AMOUNT.is_match(value) {
                        row.retrait_payee = value.to_string();
                    } else {
                        warn!(index, value, "rejected retraitPayee value");
                        return Ok(Edit::Rejected);
                    }
                }
                RowField::Client => row.client = value.to_string(),
                _ => return Err(unknown(kind, field)),
            }
        }
    }
    Ok(Edit::Applied)
}
