use std::cell::Cell;
use std::rc::Rc;

use chrono::{Duration, TimeZone, Utc};
use serde_json::Value;

use ledger_calc::clock::ManualClock;
use ledger_calc::kv::{self, KeyValueStore, Listener, MemoryStore};
use ledger_calc::model::{ErrorKey, MAX_FORMS_PER_SITE, MAX_SITES};
use ledger_calc::store::SITES_KEY;
use ledger_calc::voice::{self, DictationTarget, Transcriber, VoiceLanguage};
use ledger_calc::{
    Direction, Edit, LedgerError, RowField, RowKind, ScalarField, Site, SitePatch, SiteColor,
    SiteStore, StoreOptions,
};

fn clock() -> Rc<ManualClock> {
    Rc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()))
}

fn open_with(kv: Box<dyn KeyValueStore>, clock: &Rc<ManualClock>) -> SiteStore {
    SiteStore::open(kv, Box::new(Rc::clone(clock)), StoreOptions::default()).expect("open store")
}

fn open(clock: &Rc<ManualClock>) -> SiteStore {
    open_with(Box::new(MemoryStore::new()), clock)
}

fn stored_sites(store: &SiteStore) -> Vec<Site> {
    kv::load(store.kv(), SITES_KEY).expect("load").expect("sites written")
}

fn fill_reference(store: &mut SiteStore) {
    store.set_field(ScalarField::SoldeDeDebut, "100");
    store.set_field(ScalarField::SoldeALinstant, "20");
    store.set_field(ScalarField::Fond, "5");
    store.update_row(RowKind::Credit, 0, RowField::Details, "10").unwrap();
    store.update_row(RowKind::CreditPayee, 0, RowField::Details, "2").unwrap();
    store.update_row(RowKind::Depense, 0, RowField::Details, "3").unwrap();
    store.update_row(RowKind::Retrait, 0, RowField::Retrait, "4").unwrap();
}

#[test]
fn fresh_store_has_one_default_site() {
    let clock = clock();
    let store = open(&clock);
    assert_eq!(store.sites().len(), 1);
    assert_eq!(store.current_site().name, "Default Site");
    assert_eq!(store.current_site().forms.len(), 1);
    assert_eq!(store.draft().credit_rows.len(), 1);
    assert_eq!(store.draft().multiplier.as_str(), "1.1");
}

#[test]
fn reference_balance_is_computed_and_written_through() {
    let clock = clock();
    let mut store = open(&clock);
    fill_reference(&mut store);
    assert_eq!(store.draft().retrait_rows[0].retrait_payee, "OK");

    let balance = store.calculate().unwrap();
    assert_eq!(balance.result, "Total: 82.4");
    assert_eq!(store.draft().result, "Total: 82.4");
    assert_eq!(store.history().len(), 1);
    assert!(!store.has_pending_save());

    let sites = stored_sites(&store);
    assert_eq!(sites[0].forms[0].result, "Total: 82.4");
    assert_eq!(sites[0].forms[0].calculation_history.len(), 1);
}

#[test]
fn missing_opening_balance_blocks_calculation() {
    let clock = clock();
    for raw in ["", "0", "abc"] {
        let mut store = open(&clock);
        store.set_field(ScalarField::SoldeDeDebut, raw);
        let err = store.calculate().unwrap_err();
        assert!(matches!(err, LedgerError::Validation { key: ErrorKey::SoldeDeDebut, .. }));
        assert!(store.errors().get(ErrorKey::SoldeDeDebut).is_some());
        assert!(store.draft().result.is_empty());
        assert!(store.history().is_empty());
    }
}

#[test]
fn capacity_limits_leave_state_untouched() {
    let clock = clock();
    let mut store = open(&clock);

    for _ in 1..MAX_FORMS_PER_SITE {
        store.add_form(0).unwrap();
    }
    let err = store.add_form(0).unwrap_err();
    assert!(err.is_capacity());
    assert_eq!(store.current_site().forms.len(), MAX_FORMS_PER_SITE);

    for _ in 1..MAX_SITES {
        store.add_site().unwrap();
    }
    assert_eq!(store.sites()[1].name, "Site 2");
    let err = store.add_site().unwrap_err();
    assert!(matches!(err, LedgerError::SiteLimit { max: 5 }));
    assert_eq!(store.sites().len(), MAX_SITES);
}

#[test]
fn new_form_carries_the_running_balance_over() {
    let clock = clock();
    let mut store = open(&clock);
    store.set_field(ScalarField::SoldeALinstant, "10+5");
    store.add_form(0).unwrap();

    assert_eq!(store.form_index(), 1);
    assert_eq!(store.draft().solde_de_debut, "15");
    // the previous form kept its edit
    assert_eq!(store.current_site().forms[0].solde_a_linstant, "10+5");
}

#[test]
fn deleting_forms_keeps_the_cursor_valid() {
    let clock = clock();
    let mut store = open(&clock);
    store.add_form(0).unwrap();
    store.add_form(0).unwrap();
    assert_eq!(store.form_index(), 2);

    store.delete_form(0, 0, || true).unwrap();
    assert_eq!(store.form_index(), 1);

    store.delete_form(0, 1, || true).unwrap();
    assert_eq!(store.form_index(), 0);
    assert_eq!(store.current_site().forms.len(), 1);

    store.set_field(ScalarField::Fond, "9");
    assert_eq!(store.delete_form(0, 0, || false).unwrap(), Edit::Rejected);
    assert_eq!(store.draft().fond, "9");

    let old_id = store.draft().id.clone();
    assert_eq!(store.delete_form(0, 0, || true).unwrap(), Edit::Applied);
    assert_eq!(store.current_site().forms.len(), 1);
    assert_ne!(store.draft().id, old_id);
    assert!(store.draft().fond.is_empty());
}

#[test]
fn sites_can_be_navigated_renamed_and_deleted() {
    let clock = clock();
    let mut store = open(&clock);
    assert!(matches!(store.delete_site(0), Err(LedgerError::LastSite)));

    store.add_site().unwrap();
    store.add_site().unwrap();
    assert_eq!(store.site_index(), 2);

    store.navigate_site(Direction::Next).unwrap();
    assert_eq!(store.site_index(), 2);
    store.navigate_site(Direction::Prev).unwrap();
    assert_eq!(store.site_index(), 1);

    store
        .update_site(
            1,
            SitePatch {
                name: Some("Dépôt".into()),
                color: Some(SiteColor::Green),
            },
        )
        .unwrap();
    assert_eq!(store.draft().site, "Dépôt");
    assert_eq!(store.draft().site_color, SiteColor::Green);

    store.delete_site(0).unwrap();
    assert_eq!(store.site_index(), 0);
    assert_eq!(store.current_site().name, "Dépôt");

    store.delete_site(0).unwrap();
    assert_eq!(store.sites().len(), 1);
    assert_eq!(store.site_index(), 0);
}

#[test]
fn renaming_a_site_keeps_pending_edits() {
    let clock = clock();
    let mut store = open(&clock);
    store.set_field(ScalarField::Fond, "7");
    assert!(store.has_pending_save());

    store
        .update_site(
            0,
            SitePatch {
                name: Some("Renamed".into()),
                color: None,
            },
        )
        .unwrap();
    assert!(!store.has_pending_save());

    let sites = stored_sites(&store);
    assert_eq!(sites[0].name, "Renamed");
    assert_eq!(sites[0].forms[0].fond, "7");
    assert_eq!(sites[0].forms[0].site, "Renamed");
    assert_eq!(store.draft().fond, "7");
}

#[test]
fn renaming_another_site_keeps_pending_edits() {
    let clock = clock();
    let mut store = open(&clock);
    store.add_site().unwrap();
    store.set_field(ScalarField::Fond, "4");

    store
        .update_site(
            0,
            SitePatch {
                name: None,
                color: Some(SiteColor::Purple),
            },
        )
        .unwrap();

    let sites = stored_sites(&store);
    assert_eq!(sites[0].color, SiteColor::Purple);
    assert_eq!(sites[1].forms[0].fond, "4");
    assert_eq!(store.site_index(), 1);
}

#[test]
fn form_navigation_commits_and_clamps() {
    let clock = clock();
    let mut store = open(&clock);
    store.add_form(0).unwrap();
    store.add_form(0).unwrap();
    store.select_form(1).unwrap();
    store.set_field(ScalarField::Fond, "12");

    store.navigate_form(Direction::Prev);
    assert_eq!(store.form_index(), 0);
    assert_eq!(store.current_site().forms[1].fond, "12");
    assert_eq!(stored_sites(&store)[0].forms[1].fond, "12");
    assert!(store.draft().fond.is_empty());

    store.navigate_form(Direction::Prev);
    assert_eq!(store.form_index(), 0);

    store.navigate_form(Direction::Next);
    assert_eq!(store.form_index(), 1);
    assert_eq!(store.draft().fond, "12");

    store.navigate_form(Direction::Next);
    store.navigate_form(Direction::Next);
    assert_eq!(store.form_index(), 2);

    assert!(matches!(
        store.select_form(3),
        Err(LedgerError::OutOfRange { what: "form", index: 3 })
    ));
    assert_eq!(store.form_index(), 2);
}

#[test]
fn selecting_a_site_commits_and_starts_at_its_first_form() {
    let clock = clock();
    let mut store = open(&clock);
    store.add_form(0).unwrap();
    store.set_field(ScalarField::Fond, "6");
    store.add_site().unwrap();
    assert_eq!(store.site_index(), 1);

    store.select_site(0).unwrap();
    assert_eq!(store.site_index(), 0);
    assert_eq!(store.form_index(), 0);
    assert_eq!(store.current_site().forms[1].fond, "6");

    store.select_form(1).unwrap();
    assert_eq!(store.draft().fond, "6");

    assert!(store.select_site(5).is_err());
    assert_eq!(store.site_index(), 0);
    assert_eq!(store.form_index(), 1);
}

#[test]
fn edits_are_debounced_until_the_deadline() {
    let clock = clock();
    let mut store = open(&clock);
    store.set_field(ScalarField::Fond, "7");
    assert!(store.has_pending_save());

    clock.advance(Duration::milliseconds(300));
    store.set_field(ScalarField::Fond, "8");
    clock.advance(Duration::milliseconds(300));
    assert!(!store.tick());

    clock.advance(Duration::milliseconds(250));
    assert!(store.tick());
    assert!(!store.has_pending_save());
    assert_eq!(stored_sites(&store)[0].forms[0].fond, "8");
}

#[test]
fn reset_is_idempotent() {
    let clock = clock();
    let mut store = open(&clock);
    fill_reference(&mut store);
    store.add_row(RowKind::Depense);

    store.reset();
    let once = store.draft().clone();
    store.reset();
    assert_eq!(store.draft(), &once);
    assert_eq!(once.depense_rows.len(), 1);
    assert!(once.fond.is_empty());
}

#[test]
fn history_preview_and_restore() {
    let clock = clock();
    let mut store = open(&clock);
    fill_reference(&mut store);
    store.calculate().unwrap();

    clock.advance(Duration::seconds(5));
    store.set_field(ScalarField::Fond, "15");
    store.calculate().unwrap();
    assert_eq!(store.draft().result, "Total: 92.4");
    assert_eq!(store.history().len(), 2);

    let first = store.navigate_history(Direction::Prev).map(|e| e.result.clone());
    assert_eq!(first.as_deref(), Some("Total: 82.4"));

    store.restore_preview().unwrap();
    assert_eq!(store.draft().fond, "5");
    assert_eq!(store.draft().result, "Total: 82.4");
    assert_eq!(store.history().len(), 2);
}

#[test]
fn history_is_capped() {
    let clock = clock();
    let options = StoreOptions {
        history_limit: 2,
        ..StoreOptions::default()
    };
    let mut store =
        SiteStore::open(Box::new(MemoryStore::new()), Box::new(Rc::clone(&clock)), options).unwrap();
    store.set_field(ScalarField::SoldeDeDebut, "1");
    for fond in ["1", "2", "3"] {
        store.set_field(ScalarField::Fond, fond);
        store.calculate().unwrap();
    }
    let fonds: Vec<&str> = store.history().iter().map(|e| e.fond.as_str()).collect();
    assert_eq!(fonds, ["2", "3"]);
}

#[test]
fn invalid_inputs_are_rejected_without_change() {
    let clock = clock();
    let mut store = open(&clock);
    assert_eq!(store.set_field(ScalarField::Multiplier, "2"), Edit::Rejected);
    assert_eq!(store.draft().multiplier.as_str(), "1.1");

    assert_eq!(
        store.update_row(RowKind::Retrait, 0, RowField::RetraitPayee, "12a").unwrap(),
        Edit::Rejected
    );
    assert_eq!(store.remove_row(RowKind::Credit, 0).unwrap(), Edit::Rejected);
    assert!(matches!(
        store.remove_row(RowKind::Credit, 3),
        Err(LedgerError::OutOfRange { .. })
    ));
}

// ==========================================
// Voice input
// ==========================================

struct Scripted(&'static str);

impl Transcriber for Scripted {
    fn listen(&mut self, _language: VoiceLanguage) -> ledger_calc::Result<String> {
        Ok(self.0.to_string())
    }
}

#[test]
fn dictation_fills_fields() {
    let clock = clock();
    let mut store = open(&clock);
    let target = DictationTarget::Row {
        kind: RowKind::Credit,
        index: 0,
        field: RowField::Details,
    };
    let edit = voice::dictate(&mut store, &mut Scripted("dix plus cinq"), VoiceLanguage::FrFr, target)
        .unwrap();
    assert_eq!(edit, Edit::Applied);
    assert_eq!(store.draft().credit_rows[0].details, "10+5");
    assert_eq!(store.draft().credit_rows[0].total_client, "15.0");

    let err = voice::dictate(
        &mut store,
        &mut Scripted("1"),
        VoiceLanguage::None,
        DictationTarget::Scalar(ScalarField::Fond),
    )
    .unwrap_err();
    assert!(matches!(err, LedgerError::Unsupported(_)));
}

#[test]
fn late_transcripts_are_dropped() {
    let clock = clock();
    let mut store = open(&clock);
    let ticket = store.ticket();
    store.set_field(ScalarField::Fond, "1");

    let target = DictationTarget::Scalar(ScalarField::Fond);
    let err = voice::apply_transcript(&mut store, ticket, target, "deux").unwrap_err();
    assert!(matches!(err, LedgerError::Stale { .. }));
    assert_eq!(store.draft().fond, "1");

    let ticket = store.ticket();
    voice::apply_transcript(&mut store, ticket, target, "deux").unwrap();
    assert_eq!(store.draft().fond, "2");
}

// ==========================================
// Persistence failures
// ==========================================

struct FlakyStore {
    inner: MemoryStore,
    failing: Rc<Cell<bool>>,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> ledger_calc::Result<Option<Value>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> ledger_calc::Result<()> {
        if self.failing.get() {
            return Err(std::io::Error::other("disk full").into());
        }
        self.inner.set(key, value)
    }

    fn subscribe(&mut self, listener: Listener) {
        self.inner.subscribe(listener);
    }

    fn quarantine(&mut self, key: &str) -> ledger_calc::Result<()> {
        if self.failing.get() {
            return Err(std::io::Error::other("read-only").into());
        }
        self.inner.quarantine(key)
    }
}

#[test]
fn failed_writes_keep_memory_and_retry() {
    let clock = clock();
    let failing = Rc::new(Cell::new(true));
    let kv = FlakyStore {
        inner: MemoryStore::new(),
        failing: Rc::clone(&failing),
    };
    let mut store = open_with(Box::new(kv), &clock);

    fill_reference(&mut store);
    let balance = store.calculate().unwrap();
    assert_eq!(balance.result, "Total: 82.4");
    assert_eq!(store.draft().result, "Total: 82.4");
    assert!(store.has_pending_save());
    assert!(store.flush().is_err());

    failing.set(false);
    clock.advance(Duration::seconds(1));
    assert!(store.tick());
    assert!(!store.has_pending_save());
    assert_eq!(stored_sites(&store)[0].forms[0].result, "Total: 82.4");
}

#[test]
fn unreadable_sites_are_moved_aside_or_left_alone() {
    let clock = clock();
    let garbage = Value::from("not a site list");

    let mut inner = MemoryStore::new();
    inner.set(SITES_KEY, garbage.clone()).unwrap();
    let kv = FlakyStore {
        inner,
        failing: Rc::new(Cell::new(true)),
    };
    let result = SiteStore::open(Box::new(kv), Box::new(Rc::clone(&clock)), StoreOptions::default());
    assert!(result.is_err());

    let mut inner = MemoryStore::new();
    inner.set(SITES_KEY, garbage.clone()).unwrap();
    let kv = FlakyStore {
        inner,
        failing: Rc::new(Cell::new(false)),
    };
    let mut store = open_with(Box::new(kv), &clock);
    assert_eq!(store.current_site().name, "Default Site");
    assert_eq!(store.kv().get("calculator-sites.bak").unwrap(), Some(garbage.clone()));

    store.navigate_form(Direction::Next);
    assert_eq!(store.kv().get("calculator-sites.bak").unwrap(), Some(garbage));
    assert_eq!(stored_sites(&store).len(), 1);
}
