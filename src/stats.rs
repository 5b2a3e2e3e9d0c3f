use crate::amount::parse_result;
use crate::model::{LedgerForm, Site};

/// Numeric value of a form's last result, 0 when it has none.
pub fn form_amount(form: &LedgerForm) -> f64 {
    parse_result(&form.result).unwrap_or(0.0)
}

pub fn site_total(site: &Site) -> f64 {
    site.forms.iter().map(form_amount).sum()
}

pub fn collection_total(sites: &[Site]) -> f64 {
    sites.iter().map(site_total).sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FormStats {
    pub forms: usize,
    pub rows: usize,
    pub total_amount: f64,
    pub average_rows: f64,
    pub average_amount: f64,
}

pub fn form_stats<'a>(forms: impl IntoIterator<Item = &'a LedgerForm>) -> FormStats {
    let mut stats = FormStats::default();
    for form in forms {
        stats.forms += 1;
        stats.rows += form.row_count();
        stats.total_amount += form_amount(form);
    }
    if stats.forms > 0 {
        stats.average_rows = stats.rows as f64 / stats.forms as f64;
        stats.average_amount = stats.total_amount / stats.forms as f64;
    }
    stats
}
