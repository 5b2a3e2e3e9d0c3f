//! Balance calculation.
//!
//! One canonical formula folds the four row groups and the scalar fields of a
//! [`LedgerForm`] into a signed total:
//!
//! ```text
//! ((soldeDeDebut + retrait) - soldeALinstant) * multiplier
//!     - retraitPayee - depense - credit + creditPayee + fond
//! ```
//!
//! `soldeDeDebut` is mandatory. Every other field degrades to 0 when blank or
//! unparseable.

use tracing::debug;

use crate::amount::{additive_tokens, format_result, parse_or_zero, sum_additive};
use crate::error::{LedgerError, Result};
use crate::model::{ErrorKey, LedgerForm, OK_TOKEN};

pub const SOLDE_DE_DEBUT_REQUIRED: &str = "svp insérer un solde de début";

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub credit: f64,
    pub credit_payee: f64,
    pub depense: f64,
    pub retrait: f64,
    pub retrait_payee: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub totals: Totals,
    pub solde_de_debut: f64,
    pub solde_a_linstant: f64,
    pub fond: f64,
    pub multiplier: f64,
    pub value: f64,
    /// `"Total: <n.n>"`
    pub result: String,
}

pub fn row_totals(form: &LedgerForm) -> Totals {
    let retrait_payee = form
        .retrait_rows
        .iter()
        .map(|row| {
            if row.retrait_payee == OK_TOKEN {
                parse_or_zero(&row.retrait)
            } else {
                parse_or_zero(&row.retrait_payee)
            }
        })
        .sum();

    Totals {
        credit: form.credit_rows.iter().map(|r| parse_or_zero(&r.total_client)).sum(),
        credit_payee: form
            .credit_payee_rows
            .iter()
            .map(|r| parse_or_zero(&r.total_payee))
            .sum(),
        depense: form.depense_rows.iter().map(|r| parse_or_zero(&r.total_depense)).sum(),
        retrait: form.retrait_rows.iter().map(|r| parse_or_zero(&r.retrait)).sum(),
        retrait_payee,
    }
}

/// Mandatory additive field: must hold at least one number and sum to a
/// finite, non-zero value.
pub fn mandatory_amount(raw: &str, key: ErrorKey) -> Result<f64> {
    let tokens = additive_tokens(raw);
    let sum: f64 = tokens.iter().sum();
    if raw.trim().is_empty() || tokens.is_empty() || sum == 0.0 || !sum.is_finite() {
        return Err(LedgerError::Validation {
            key,
            message: SOLDE_DE_DEBUT_REQUIRED.to_string(),
        });
    }
    Ok(sum)
}

pub fn compute_balance(form: &LedgerForm) -> Result<Balance> {
    let solde_de_debut = mandatory_amount(&form.solde_de_debut, ErrorKey::SoldeDeDebut)?;
    let solde_a_linstant = sum_additive(&form.solde_a_linstant);
    let fond = parse_or_zero(&form.fond);
    let multiplier = form.multiplier.factor();
    let totals = row_totals(form);

    let value = ((solde_de_debut + totals.retrait) - solde_a_linstant) * multiplier
        - totals.retrait_payee
        - totals.depense
        - totals.credit
        + totals.credit_payee
        + fond;

    Ok(Balance {
        totals,
        solde_de_debut,
        solde_a_linstant,
        fond,
        multiplier,
        value,
        result: format_result(value),
    })
}

/// Computes the balance, stores it on the form and appends a history
/// snapshot. Nothing is written when validation fails.
///
/// History keeps at most `history_limit` entries, oldest evicted first.
pub fn calculate(form: &mut LedgerForm, timestamp: String, history_limit: usize) -> Result<Balance> {
    let balance = compute_balance(form)?;

    form.result = balance.result.clone();
    form.timestamp = timestamp;
    form.calculation_history.push(form.snapshot());

    let limit = history_limit.max(1);
    if form.calculation_history.len() > limit {
        let excess = form.calculation_history.len() - limit;
        form.calculation_history.drain(..excess);
    }

    debug!(form = %form.id, result = %balance.result, history = form.calculation_history.len(), "calculated");
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Multiplier, SiteColor};

    fn form() -> LedgerForm {
        LedgerForm::empty("Site", SiteColor::None, "2024-01-01T00:00:00.000Z".into())
    }

    fn reference_form() -> LedgerForm {
        let mut f = form();
        f.multiplier = Multiplier::OnePointOne;
        f.solde_de_debut = "100".into();
        f.solde_a_linstant = "20".into();
        f.fond = "5".into();
        f.credit_rows[0].total_client = "10".into();
        f.credit_payee_rows[0].total_payee = "2".into();
        f.depense_rows[0].total_depense = "3".into();
        f.retrait_rows[0].retrait = "4".into();
        f.retrait_rows[0].retrait_payee = "OK".into();
        f
    }

    #[test]
    fn canonical_formula() {
        let balance = compute_balance(&reference_form()).expect("balance");
        assert_eq!(balance.totals.retrait, 4.0);
        assert_eq!(balance.totals.retrait_payee, 4.0);
        assert_eq!(balance.result, "Total: 82.4");
    }

    #[test]
    fn explicit_retrait_payee_is_used_instead_of_retrait() {
        let mut f = reference_form();
        f.retrait_rows[0].retrait_payee = "1.5".into();
        let totals = row_totals(&f);
        assert_eq!(totals.retrait_payee, 1.5);
    }

    #[test]
    fn solde_a_linstant_accepts_sum_expression() {
        let mut f = reference_form();
        f.solde_a_linstant = "15+5".into();
        assert_eq!(compute_balance(&f).expect("balance").result, "Total: 82.4");
    }

    #[test]
    fn mandatory_gate_rejects_blank_zero_and_garbage() {
        for raw in ["", "0", "abc", "0+0", "  "] {
            let mut f = reference_form();
            f.solde_de_debut = raw.into();
            match calculate(&mut f, "t".into(), 10) {
                Err(LedgerError::Validation { key, .. }) => assert_eq!(key, ErrorKey::SoldeDeDebut),
                other => panic!("expected validation error for {raw:?}, got {other:?}"),
            }
            assert!(f.result.is_empty());
            assert!(f.calculation_history.is_empty());
        }
    }

    #[test]
    fn optional_garbage_counts_as_zero() {
        let mut f = form();
        f.solde_de_debut = "10".into();
        f.fond = "n/a".into();
        f.credit_rows[0].total_client = "??".into();
        f.multiplier = Multiplier::One;
        assert_eq!(compute_balance(&f).expect("balance").result, "Total: 10.0");
    }

    #[test]
    fn calculate_appends_bounded_history() {
        let mut f = reference_form();
        for i in 0..5 {
            calculate(&mut f, format!("t{i}"), 3).expect("calculate");
        }
        assert_eq!(f.result, "Total: 82.4");
        assert_eq!(f.calculation_history.len(), 3);
        assert_eq!(f.calculation_history[0].timestamp, "t2");
        assert!(f.calculation_history.iter().all(|h| h.calculation_history.is_empty()));
        assert_eq!(f.calculation_history[2].result, "Total: 82.4");
    }
}
