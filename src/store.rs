//! The site collection, its cursor and the form being edited.
//!
//! `SiteStore` owns every site, the `(site, form)` cursor and a working copy
//! of the current form (the draft). Field and row edits only touch the draft
//! and schedule a debounced write; structural operations commit the draft,
//! change the collection and write through immediately.

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::amount::{number_to_string, sum_additive};
use crate::autosave::{Autosave, DEFAULT_AUTOSAVE_DELAY_MS};
use crate::clock::{Clock, iso_timestamp};
use crate::engine::{self, Balance};
use crate::error::{LedgerError, Result};
use crate::history::HistoryCursor;
use crate::kv::{self, KeyValueStore};
use crate::model::{
    DEFAULT_SITE_NAME, FieldErrors, LedgerForm, MAX_FORMS_PER_SITE, MAX_SITES, ScalarField, Site,
    SitePatch,
};
use crate::rows::{self, Edit, RowField, RowKind};

pub const SITES_KEY: &str = "calculator-sites";
pub const SITE_INDEX_KEY: &str = "current-site-index";
pub const FORM_INDEX_KEY: &str = "current-form-index";

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

impl Direction {
    /// Moves `index` one step, clamped to `[0, len - 1]`.
    pub fn step(self, index: usize, len: usize) -> usize {
        let last = len.saturating_sub(1);
        match self {
            Direction::Prev => index.saturating_sub(1),
            Direction::Next => (index + 1).min(last),
        }
    }
}

/// Edit sequence number captured before starting asynchronous work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTicket(u64);

impl EditTicket {
    pub fn seq(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub history_limit: usize,
    pub autosave_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            autosave_delay: Duration::milliseconds(DEFAULT_AUTOSAVE_DELAY_MS),
        }
    }
}

pub struct SiteStore {
    kv: Box<dyn KeyValueStore>,
    clock: Box<dyn Clock>,
    sites: Vec<Site>,
    site_index: usize,
    form_index: usize,
    draft: LedgerForm,
    errors: FieldErrors,
    preview: HistoryCursor,
    autosave: Autosave,
    history_limit: usize,
    edit_seq: u64,
}

impl SiteStore {
    /// Loads the collection from `kv`, falling back to a single default site
    /// when nothing usable is stored. An unreadable collection is moved aside
    /// first; if that fails the store refuses to open rather than overwrite it.
    pub fn open(
        mut kv: Box<dyn KeyValueStore>,
        clock: Box<dyn Clock>,
        options: StoreOptions,
    ) -> Result<Self> {
        let now = iso_timestamp(clock.now());

        let mut sites: Vec<Site> = match kv::load(kv.as_ref(), SITES_KEY) {
            Ok(Some(sites)) => sites,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Stored sites are unreadable, moving them aside: {}", e);
                kv.quarantine(SITES_KEY)?;
                Vec::new()
            }
        };
        if sites.is_empty() {
            sites.push(Site::new(DEFAULT_SITE_NAME, now.clone()));
        }
        if sites.len() > MAX_SITES {
            warn!(stored = sites.len(), kept = MAX_SITES, "Dropping sites over the limit");
            sites.truncate(MAX_SITES);
        }
        for site in &mut sites {
            if site.forms.len() > MAX_FORMS_PER_SITE {
                warn!(
                    site = %site.name,
                    stored = site.forms.len(),
                    kept = MAX_FORMS_PER_SITE,
                    "Dropping forms over the limit"
                );
                site.forms.truncate(MAX_FORMS_PER_SITE);
            }
            site.ensure_forms(&now);
        }

        let site_index: usize = kv::load(kv.as_ref(), SITE_INDEX_KEY).ok().flatten().unwrap_or(0);
        let form_index: usize = kv::load(kv.as_ref(), FORM_INDEX_KEY).ok().flatten().unwrap_or(0);
        let site_index = site_index.min(sites.len() - 1);
        let form_index = form_index.min(sites[site_index].forms.len() - 1);

        let draft = sites[site_index].forms[form_index].clone();
        let mut store = Self {
            kv,
            clock,
            sites,
            site_index,
            form_index,
            draft,
            errors: FieldErrors::default(),
            preview: HistoryCursor::default(),
            autosave: Autosave::new(options.autosave_delay),
            history_limit: options.history_limit,
            edit_seq: 0,
        };
        store.load_draft();
        info!(
            sites = store.sites.len(),
            site = store.site_index,
            form = store.form_index,
            "ledger opened"
        );
        Ok(store)
    }

    // ==========================================
    // Accessors
    // ==========================================

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn site_index(&self) -> usize {
        self.site_index
    }

    pub fn form_index(&self) -> usize {
        self.form_index
    }

    pub fn current_site(&self) -> &Site {
        &self.sites[self.site_index]
    }

    /// The draft: current form including unsaved edits.
    pub fn draft(&self) -> &LedgerForm {
        &self.draft
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }

    pub fn has_pending_save(&self) -> bool {
        self.autosave.is_pending()
    }

    pub fn ticket(&self) -> EditTicket {
        EditTicket(self.edit_seq)
    }

    fn now(&self) -> String {
        iso_timestamp(self.clock.now())
    }

    fn check_site(&self, index: usize) -> Result<()> {
        if index < self.sites.len() {
            Ok(())
        } else {
            Err(LedgerError::OutOfRange { what: "site", index })
        }
    }

    // ==========================================
    // Draft edits (debounced)
    // ==========================================

    fn mark_edited(&mut self) {
        self.edit_seq += 1;
        self.autosave.schedule(self.clock.now());
    }

    pub fn set_field(&mut self, field: ScalarField, value: &str) -> Edit {
        match field {
            ScalarField::Fond => self.draft.fond = value.to_string(),
            ScalarField::SoldeALinstant => self.draft.solde_a_linstant = value.to_string(),
            ScalarField::SoldeDeDebut => self.draft.solde_de_debut = value.to_string(),
            ScalarField::Multiplier => match value.parse() {
                Ok(multiplier) => self.draft.multiplier = multiplier,
                Err(e) => {
                    warn!("{}", e);
                    return Edit::Rejected;
                }
            },
        }
        self.mark_edited();
        Edit::Applied
    }

    pub fn add_row(&mut self, kind: RowKind) {
        rows::add_row(&mut self.draft, kind);
        self.mark_edited();
    }

    pub fn remove_row(&mut self, kind: RowKind, index: usize) -> Result<Edit> {
        let edit = rows::remove_row(&mut self.draft, kind, index)?;
        if edit.applied() {
            self.mark_edited();
        }
        Ok(edit)
    }

    pub fn update_row(
        &mut self,
        kind: RowKind,
        index: usize,
        field: RowField,
        value: &str,
    ) -> Result<Edit> {
        let edit = rows::update_row(&mut self.draft, kind, index, field, value)?;
        if edit.applied() {
            self.mark_edited();
        }
        Ok(edit)
    }

    /// Blanks the draft back to one empty row per kind and multiplier 1.1.
    pub fn reset(&mut self) {
        self.draft.clear_inputs();
        self.errors.clear_all();
        self.mark_edited();
    }

    /// Applies the result of asynchronous work started at `ticket`. Results
    /// that arrive after newer edits are rejected.
    pub fn apply_if_current<F>(&mut self, ticket: EditTicket, apply: F) -> Result<Edit>
    where
        F: FnOnce(&mut Self) -> Result<Edit>,
    {
        if ticket.0 != self.edit_seq {
            warn!(ticket = ticket.0, current = self.edit_seq, "dropping stale update");
            return Err(LedgerError::Stale {
                ticket: ticket.0,
                current: self.edit_seq,
            });
        }
        apply(self)
    }

    // ==========================================
    // Calculation & history
    // ==========================================

    /// Computes the draft's balance, records a history snapshot and writes
    /// through. A missing `soldeDeDebut` sets its field error instead.
    pub fn calculate(&mut self) -> Result<Balance> {
        let timestamp = self.now();
        match engine::calculate(&mut self.draft, timestamp, self.history_limit) {
            Ok(balance) => {
                self.errors.clear_all();
                self.edit_seq += 1;
                self.commit_current_edits();
                self.persist();
                Ok(balance)
            }
            Err(LedgerError::Validation { key, message }) => {
                self.errors.set(key, message.clone());
                Err(LedgerError::Validation { key, message })
            }
            Err(e) => Err(e),
        }
    }

    /// Draft history entries worth previewing.
    pub fn history(&self) -> Vec<&LedgerForm> {
        crate::history::meaningful(&self.draft)
    }

    pub fn preview_index(&self) -> usize {
        self.preview.index()
    }

    pub fn navigate_history(&mut self, direction: Direction) -> Option<&LedgerForm> {
        let len = self.history().len();
        self.preview.navigate(direction, len);
        self.history().get(self.preview.index()).copied()
    }

    /// Copies a history entry's inputs into the draft, discarding unsaved
    /// edits. The draft keeps its own history.
    pub fn restore(&mut self, entry: &LedgerForm) {
        self.draft.copy_inputs_from(entry);
        self.errors.clear_all();
        self.mark_edited();
    }

    pub fn restore_preview(&mut self) -> Result<()> {
        let entry = self
            .history()
            .get(self.preview.index())
            .map(|entry| (*entry).clone())
            .ok_or(LedgerError::OutOfRange {
                what: "history entry",
                index: self.preview.index(),
            })?;
        self.restore(&entry);
        Ok(())
    }

    // ==========================================
    // Persistence
    // ==========================================

    /// Writes the draft back into its slot in the collection.
    pub fn commit_current_edits(&mut self) {
        let now = self.now();
        let site = &mut self.sites[self.site_index];
        self.draft.site = site.name.clone();
        self.draft.site_color = site.color;
        site.forms[self.form_index] = self.draft.clone();
        site.touch(now);
    }

    fn write_all(&mut self) -> Result<()> {
        kv::save(self.kv.as_mut(), SITES_KEY, &self.sites)?;
        kv::save(self.kv.as_mut(), SITE_INDEX_KEY, &self.site_index)?;
        kv::save(self.kv.as_mut(), FORM_INDEX_KEY, &self.form_index)?;
        Ok(())
    }

    /// Writes the whole collection. Failures are logged and retried by the
    /// next autosave; memory is never rolled back.
    fn persist(&mut self) {
        match self.write_all() {
            Ok(()) => {
                self.autosave.cancel();
                debug!("collection persisted");
            }
            Err(e) => {
                error!("Error saving state: {}", e);
                self.autosave.schedule(self.clock.now());
            }
        }
    }

    /// Flushes a pending autosave once its deadline has passed.
    pub fn tick(&mut self) -> bool {
        if !self.autosave.is_due(self.clock.now()) {
            return false;
        }
        self.commit_current_edits();
        self.persist();
        true
    }

    /// Commits and writes immediately, reporting failures to the caller.
    pub fn flush(&mut self) -> Result<()> {
        self.commit_current_edits();
        self.write_all()?;
        self.autosave.cancel();
        Ok(())
    }

    /// Drops a scheduled autosave without writing.
    pub fn cancel_pending(&mut self) {
        self.autosave.cancel();
    }

    /// Final flush when the session ends, if anything is still pending.
    pub fn close(mut self) -> Result<()> {
        if self.autosave.is_pending() {
            self.flush()?;
        }
        Ok(())
    }

    fn load_draft(&mut self) {
        let site = &self.sites[self.site_index];
        let mut draft = site.forms[self.form_index].clone();
        draft.ensure_rows();
        draft.site = site.name.clone();
        draft.site_color = site.color;
        self.draft = draft;
        self.errors.clear_all();
        self.preview = HistoryCursor::default();
        self.edit_seq += 1;
    }

    // ==========================================
    // Sites
    // ==========================================

    pub fn add_site(&mut self) -> Result<usize> {
        if self.sites.len() >= MAX_SITES {
            warn!(max = MAX_SITES, "site limit reached");
            return Err(LedgerError::SiteLimit { max: MAX_SITES });
        }
        self.commit_current_edits();

        let name = format!("Site {}", self.sites.len() + 1);
        self.sites.push(Site::new(&name, self.now()));
        self.site_index = self.sites.len() - 1;
        self.form_index = 0;
        self.load_draft();
        self.persist();
        info!(site = self.site_index, %name, "site added");
        Ok(self.site_index)
    }

    /// Deletes a site. The last remaining site is kept.
    pub fn delete_site(&mut self, index: usize) -> Result<()> {
        self.check_site(index)?;
        if self.sites.len() <= 1 {
            return Err(LedgerError::LastSite);
        }
        self.commit_current_edits();

        let removed = self.sites.remove(index);
        if index == self.site_index {
            self.site_index = index.saturating_sub(1);
            self.form_index = 0;
            self.load_draft();
        } else if index < self.site_index {
            self.site_index -= 1;
        }
        self.persist();
        info!(name = %removed.name, "site deleted");
        Ok(())
    }

    pub fn select_site(&mut self, index: usize) -> Result<()> {
        self.check_site(index)?;
        self.commit_current_edits();
        self.site_index = index;
        self.form_index = 0;
        self.load_draft();
        self.persist();
        Ok(())
    }

    pub fn navigate_site(&mut self, direction: Direction) -> Result<()> {
        let target = direction.step(self.site_index, self.sites.len());
        self.select_site(target)
    }

    pub fn update_site(&mut self, index: usize, patch: SitePatch) -> Result<()> {
        self.check_site(index)?;
        let now = self.now();
        let site = &mut self.sites[index];
        if let Some(name) = patch.name {
            site.name = name;
        }
        if let Some(color) = patch.color {
            site.color = color;
        }
        site.touch(now);
        // persist writes the collection, so pending draft edits must be in it
        self.commit_current_edits();
        self.persist();
        Ok(())
    }

    // ==========================================
    // Forms
    // ==========================================

    /// Appends an empty form whose `soldeDeDebut` carries over the previous
    /// form's `soldeALinstant`.
    pub fn add_form(&mut self, site_index: usize) -> Result<usize> {
        self.check_site(site_index)?;
        if self.sites[site_index].forms.len() >= MAX_FORMS_PER_SITE {
            warn!(max = MAX_FORMS_PER_SITE, site = site_index, "form limit reached");
            return Err(LedgerError::FormLimit {
                max: MAX_FORMS_PER_SITE,
            });
        }
        self.commit_current_edits();

        let now = self.now();
        let site = &mut self.sites[site_index];
        let previous = if site_index == self.site_index {
            &site.forms[self.form_index]
        } else {
            &site.forms[site.forms.len() - 1]
        };
        let carried = carry_over(&previous.solde_a_linstant);

        let mut form = LedgerForm::empty(&site.name, site.color, now.clone());
        form.solde_de_debut = carried;
        site.forms.push(form);
        site.touch(now);

        self.site_index = site_index;
        self.form_index = self.sites[site_index].forms.len() - 1;
        self.load_draft();
        self.persist();
        Ok(self.form_index)
    }

    /// Deletes a form. The last form of a site is replaced by a blank one,
    /// and only when `confirm` agrees.
    pub fn delete_form<F>(&mut self, site_index: usize, form_index: usize, confirm: F) -> Result<Edit>
    where
        F: FnOnce() -> bool,
    {
        self.check_site(site_index)?;
        if form_index >= self.sites[site_index].forms.len() {
            return Err(LedgerError::OutOfRange {
                what: "form",
                index: form_index,
            });
        }
        self.commit_current_edits();

        let now = self.now();
        let is_current_site = site_index == self.site_index;
        let site = &mut self.sites[site_index];

        if site.forms.len() == 1 {
            if !confirm() {
                return Ok(Edit::Rejected);
            }
            site.forms[0] = LedgerForm::empty(&site.name, site.color, now.clone());
            site.touch(now);
            if is_current_site {
                self.form_index = 0;
                self.load_draft();
            }
            self.persist();
            return Ok(Edit::Applied);
        }

        site.forms.remove(form_index);
        site.touch(now);
        if is_current_site {
            if form_index == self.form_index {
                self.form_index = form_index.saturating_sub(1);
                self.load_draft();
            } else if form_index < self.form_index {
                self.form_index -= 1;
            }
        }
        self.persist();
        Ok(Edit::Applied)
    }

    /// Saves the draft, then moves one form left or right.
    pub fn navigate_form(&mut self, direction: Direction) {
        self.commit_current_edits();
        let len = self.sites[self.site_index].forms.len();
        self.form_index = direction.step(self.form_index, len);
        self.load_draft();
        self.persist();
    }

    pub fn select_form(&mut self, index: usize) -> Result<()> {
        if index >= self.current_site().forms.len() {
            return Err(LedgerError::OutOfRange { what: "form", index });
        }
        self.commit_current_edits();
        self.form_index = index;
        self.load_draft();
        self.persist();
        Ok(())
    }
}

/// Opening balance for a new form: `"10+5"` becomes `"15"`, a single value is
/// kept as typed.
pub fn carry_over(solde_a_linstant: &str) -> String {
    if solde_a_linstant.contains('+') {
        number_to_string(sum_additive(solde_a_linstant))
    } else {
        solde_a_linstant.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_clamps() {
        assert_eq!(Direction::Prev.step(0, 3), 0);
        assert_eq!(Direction::Next.step(2, 3), 2);
        assert_eq!(Direction::Next.step(0, 3), 1);
        assert_eq!(Direction::Next.step(0, 0), 0);
    }

    #[test]
    fn carry_over_sums_expressions() {
        assert_eq!(carry_over("10+5"), "15");
        assert_eq!(carry_over("10.5 + 2"), "12.5");
        assert_eq!(carry_over("42"), "42");
        assert_eq!(carry_over(""), "");
    }
}
