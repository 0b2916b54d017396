//! Integration tests for the custody ledger.
//!
//! These tests drive the ledger through its public API only, with the
//! in-memory bank standing in for the settlement layer, and check that the
//! books and the external holdings agree after every step.

use coffer_contracts::{CustodyLedger, LedgerError};
use coffer_protocol::asset::AssetId;
use coffer_protocol::custody::{AssetBank, AssetTransferAgent, TransferError};
use coffer_protocol::events::{LedgerEvent, MemorySink};
use coffer_protocol::identity::ParticipantId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type TestLedger = CustodyLedger<AssetBank, MemorySink>;

fn admin() -> ParticipantId {
    ParticipantId::derive("admin")
}

fn participant_a() -> ParticipantId {
    ParticipantId::derive("participant-a")
}

fn participant_b() -> ParticipantId {
    ParticipantId::derive("participant-b")
}

fn asset_x() -> AssetId {
    AssetId::derive("X", "issuer-x")
}

fn asset_y() -> AssetId {
    AssetId::derive("Y", "issuer-y")
}

/// Helper: a ledger with X and Y allow-listed and A, B funded externally
/// with 1 000 of each.
fn funded_ledger() -> (TestLedger, MemorySink) {
    let mut bank = AssetBank::new();
    for p in [participant_a(), participant_b()] {
        bank.mint(p, asset_x(), 1_000).unwrap();
        bank.mint(p, asset_y(), 1_000).unwrap();
    }
    let sink = MemorySink::new();
    let mut ledger = CustodyLedger::new(admin(), bank, sink.clone()).unwrap();
    ledger.allow_asset(&admin(), asset_x()).unwrap();
    ledger.allow_asset(&admin(), asset_y()).unwrap();
    sink.clear();
    (ledger, sink)
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn deposit_then_withdraw_restores_external_holdings() {
    let (mut ledger, sink) = funded_ledger();
    let custody = ledger.custody_account();

    ledger.deposit(&participant_a(), &asset_x(), 100).unwrap();
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 100);
    assert_eq!(ledger.agent().custody_total(&custody, &asset_x()), 100);
    assert_eq!(ledger.agent().holdings_of(&participant_a(), &asset_x()), 900);

    ledger.withdraw(&participant_a(), &asset_x(), 100).unwrap();
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 0);
    assert_eq!(ledger.agent().custody_total(&custody, &asset_x()), 0);
    assert_eq!(ledger.agent().holdings_of(&participant_a(), &asset_x()), 1_000);

    assert_eq!(
        sink.events(),
        vec![
            LedgerEvent::DepositCompleted {
                participant: participant_a(),
                asset: asset_x(),
                amount: 100,
            },
            LedgerEvent::WithdrawCompleted {
                participant: participant_a(),
                asset: asset_x(),
                amount: 100,
            },
        ]
    );
}

#[test]
fn pause_blocks_deposit_until_unpaused() {
    let (mut ledger, _) = funded_ledger();

    ledger.pause(&admin()).unwrap();
    assert_eq!(
        ledger.deposit(&participant_a(), &asset_x(), 50),
        Err(LedgerError::SystemPaused)
    );
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 0);

    ledger.unpause(&admin()).unwrap();
    ledger.deposit(&participant_a(), &asset_x(), 50).unwrap();
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 50);
}

#[test]
fn participants_are_isolated() {
    let (mut ledger, _) = funded_ledger();

    ledger.deposit(&participant_a(), &asset_x(), 300).unwrap();
    ledger.deposit(&participant_b(), &asset_y(), 200).unwrap();

    // A cannot reach into B's asset, nor B into A's.
    assert!(matches!(
        ledger.withdraw(&participant_a(), &asset_y(), 1),
        Err(LedgerError::InsufficientBalance { available: 0, .. })
    ));
    assert!(matches!(
        ledger.withdraw(&participant_b(), &asset_x(), 1),
        Err(LedgerError::InsufficientBalance { available: 0, .. })
    ));

    ledger.withdraw(&participant_a(), &asset_x(), 300).unwrap();
    assert_eq!(ledger.balance_of(&participant_b(), &asset_y()), 200);
    ledger.withdraw(&participant_b(), &asset_y(), 200).unwrap();
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 0);
}

#[test]
fn overdraw_fails_and_keeps_balance() {
    let (mut ledger, sink) = funded_ledger();
    ledger.deposit(&participant_a(), &asset_x(), 100).unwrap();
    sink.clear();

    assert_eq!(
        ledger.withdraw(&participant_a(), &asset_x(), 150),
        Err(LedgerError::InsufficientBalance {
            available: 100,
            requested: 150,
        })
    );
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 100);
    assert!(sink.is_empty());
}

// ---------------------------------------------------------------------------
// Guard properties
// ---------------------------------------------------------------------------

#[test]
fn paused_ledger_reports_paused_for_any_input() {
    let (mut ledger, _) = funded_ledger();
    ledger.deposit(&participant_a(), &asset_x(), 10).unwrap();
    ledger.pause(&admin()).unwrap();
    let before = ledger.snapshot();

    let unknown = AssetId::derive("NOPE", "nobody");
    for participant in [participant_a(), ParticipantId::NULL] {
        for asset in [asset_x(), unknown] {
            for amount in [0, 1, 10, u64::MAX] {
                assert_eq!(
                    ledger.deposit(&participant, &asset, amount),
                    Err(LedgerError::SystemPaused)
                );
                assert_eq!(
                    ledger.withdraw(&participant, &asset, amount),
                    Err(LedgerError::SystemPaused)
                );
            }
        }
    }
    assert_eq!(ledger.snapshot().balances, before.balances);
}

#[test]
fn zero_amount_and_unlisted_asset_always_rejected() {
    let (mut ledger, _) = funded_ledger();
    let unknown = AssetId::derive("NOPE", "nobody");

    assert_eq!(
        ledger.deposit(&participant_a(), &asset_x(), 0),
        Err(LedgerError::ZeroAmount)
    );
    assert_eq!(
        ledger.withdraw(&participant_a(), &asset_x(), 0),
        Err(LedgerError::ZeroAmount)
    );
    assert_eq!(
        ledger.deposit(&participant_a(), &unknown, 10),
        Err(LedgerError::AssetNotAllowed(unknown))
    );
    assert_eq!(
        ledger.withdraw(&participant_a(), &unknown, 10),
        Err(LedgerError::AssetNotAllowed(unknown))
    );
}

#[test]
fn null_participant_rejected() {
    let (mut ledger, _) = funded_ledger();
    assert_eq!(
        ledger.deposit(&ParticipantId::NULL, &asset_x(), 10),
        Err(LedgerError::InvalidIdentity)
    );
    assert_eq!(
        ledger.withdraw(&ParticipantId::NULL, &asset_x(), 10),
        Err(LedgerError::InvalidIdentity)
    );
}

#[test]
fn custody_account_cannot_move_funds_as_participant() {
    let (mut ledger, sink) = funded_ledger();
    let custody = ledger.custody_account();
    ledger.deposit(&participant_a(), &asset_x(), 100).unwrap();
    sink.clear();
    let before = ledger.snapshot();

    assert_eq!(
        ledger.deposit(&custody, &asset_x(), 100),
        Err(LedgerError::InvalidIdentity)
    );
    assert_eq!(
        ledger.withdraw(&custody, &asset_x(), 100),
        Err(LedgerError::InvalidIdentity)
    );

    assert_eq!(ledger.snapshot(), before);
    assert_eq!(ledger.balance_of(&custody, &asset_x()), 0);
    assert_eq!(ledger.total_recorded(&asset_x()), 100);
    assert_eq!(ledger.agent().custody_total(&custody, &asset_x()), 100);
    assert!(sink.is_empty());
}

#[test]
fn paused_check_still_precedes_custody_identity_check() {
    let (mut ledger, _) = funded_ledger();
    let custody = ledger.custody_account();
    ledger.pause(&admin()).unwrap();
    assert_eq!(
        ledger.deposit(&custody, &asset_x(), 1),
        Err(LedgerError::SystemPaused)
    );
}

#[test]
fn administrator_deposits_like_any_participant() {
    let (mut ledger, _) = funded_ledger();
    ledger.agent_mut().mint(admin(), asset_x(), 50).unwrap();

    assert_eq!(ledger.deposit(&admin(), &asset_x(), 30), Ok(30));
    assert_eq!(ledger.withdraw(&admin(), &asset_x(), 10), Ok(20));

    let custody = ledger.custody_account();
    assert_eq!(ledger.agent().holdings_of(&admin(), &asset_x()), 30);
    assert_eq!(ledger.agent().custody_total(&custody, &asset_x()), 20);
    assert_eq!(ledger.total_recorded(&asset_x()), 20);
}

#[test]
fn only_administrator_may_administer() {
    let (mut ledger, sink) = funded_ledger();
    let outsider = participant_a();
    let before = ledger.snapshot();
    let unauthorized = Err(LedgerError::Unauthorized { caller: outsider });

    assert_eq!(
        ledger.allow_asset(&outsider, AssetId::derive("Z", "z")).map(|_| ()),
        unauthorized
    );
    assert_eq!(ledger.pause(&outsider).map(|_| ()), unauthorized);
    assert_eq!(ledger.unpause(&outsider).map(|_| ()), unauthorized);
    assert_eq!(
        ledger.transfer_authority(&outsider, outsider).map(|_| ()),
        unauthorized
    );

    assert_eq!(ledger.snapshot(), before);
    assert!(sink.is_empty());
}

#[test]
fn authority_transfer_hands_over_every_privilege() {
    let (mut ledger, sink) = funded_ledger();
    let successor = ParticipantId::derive("successor");

    assert_eq!(ledger.transfer_authority(&admin(), successor).unwrap(), admin());
    assert_eq!(ledger.administrator(), successor);
    assert!(ledger.pause(&admin()).is_err());
    assert!(ledger.pause(&successor).unwrap());
    assert!(ledger.unpause(&successor).unwrap());

    let kinds: Vec<_> = sink.events().iter().map(LedgerEvent::kind).collect();
    assert_eq!(kinds, vec!["authority_transferred", "paused", "unpaused"]);
}

// ---------------------------------------------------------------------------
// Transfer failures
// ---------------------------------------------------------------------------

/// Settlement double whose pushes always fail and whose pulls can be
/// switched off.
#[derive(Default)]
struct FlakySettlement {
    refuse_pulls: bool,
    pulls: u32,
    pushes: u32,
}

impl AssetTransferAgent for FlakySettlement {
    fn pull_into(
        &mut self,
        _custody: &ParticipantId,
        _from: &ParticipantId,
        _asset: &AssetId,
        _amount: u64,
    ) -> Result<(), TransferError> {
        self.pulls += 1;
        if self.refuse_pulls {
            return Err(TransferError::Rejected("pull refused".into()));
        }
        Ok(())
    }

    fn push_from(
        &mut self,
        _custody: &ParticipantId,
        _to: &ParticipantId,
        _asset: &AssetId,
        _amount: u64,
    ) -> Result<(), TransferError> {
        self.pushes += 1;
        Err(TransferError::Rejected("push refused".into()))
    }
}

#[test]
fn failed_pull_credits_nothing() {
    let sink = MemorySink::new();
    let agent = FlakySettlement {
        refuse_pulls: true,
        ..Default::default()
    };
    let mut ledger = CustodyLedger::new(admin(), agent, sink.clone()).unwrap();
    ledger.allow_asset(&admin(), asset_x()).unwrap();
    sink.clear();

    let err = ledger.deposit(&participant_a(), &asset_x(), 10).unwrap_err();
    assert_eq!(
        err,
        LedgerError::TransferFailed(TransferError::Rejected("pull refused".into()))
    );
    assert_eq!(ledger.agent().pulls, 1);
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 0);
    assert!(sink.is_empty());
}

#[test]
fn failed_push_rolls_back_debit() {
    let sink = MemorySink::new();
    let mut ledger = CustodyLedger::new(admin(), FlakySettlement::default(), sink.clone()).unwrap();
    ledger.allow_asset(&admin(), asset_x()).unwrap();
    ledger.deposit(&participant_a(), &asset_x(), 80).unwrap();
    sink.clear();

    let err = ledger.withdraw(&participant_a(), &asset_x(), 80).unwrap_err();
    assert_eq!(err.kind(), "transfer_failed");
    assert_eq!(ledger.agent().pushes, 1);
    assert_eq!(ledger.balance_of(&participant_a(), &asset_x()), 80);
    assert!(sink.is_empty());
}

#[test]
fn guards_run_before_any_transfer() {
    let mut ledger =
        CustodyLedger::new(admin(), FlakySettlement::default(), MemorySink::new()).unwrap();
    ledger.allow_asset(&admin(), asset_x()).unwrap();

    let _ = ledger.deposit(&participant_a(), &asset_y(), 10);
    let _ = ledger.deposit(&participant_a(), &asset_x(), 0);
    let _ = ledger.withdraw(&participant_a(), &asset_x(), 10);
    assert_eq!(ledger.agent().pulls, 0);
    assert_eq!(ledger.agent().pushes, 0);
}

// ---------------------------------------------------------------------------
// Conservation
// ---------------------------------------------------------------------------

#[test]
fn random_operations_keep_books_consistent() {
    let (mut ledger, _) = funded_ledger();
    let custody = ledger.custody_account();
    let participants = [participant_a(), participant_b()];
    let assets = [asset_x(), asset_y()];
    let mut rng = StdRng::seed_from_u64(0xC0FF_EE);

    // Net successful deposits per (participant, asset).
    let mut net = std::collections::HashMap::new();

    for _ in 0..2_000 {
        let p = participants[rng.gen_range(0..2)];
        let a = assets[rng.gen_range(0..2)];
        let amount = rng.gen_range(0..150u64);

        if rng.gen_bool(0.5) {
            if ledger.deposit(&p, &a, amount).is_ok() {
                *net.entry((p, a)).or_insert(0u64) += amount;
            }
        } else if ledger.withdraw(&p, &a, amount).is_ok() {
            *net.entry((p, a)).or_insert(0u64) -= amount;
        }

        if rng.gen_ratio(1, 50) {
            if ledger.is_paused() {
                ledger.unpause(&admin()).unwrap();
            } else {
                ledger.pause(&admin()).unwrap();
            }
        }
    }

    for p in participants {
        for a in assets {
            let recorded = ledger.balance_of(&p, &a);
            assert_eq!(recorded, net.get(&(p, a)).copied().unwrap_or(0));
            assert_eq!(ledger.agent().holdings_of(&p, &a) + recorded, 1_000);
        }
    }
    for a in assets {
        assert_eq!(ledger.total_recorded(&a), ledger.agent().custody_total(&custody, &a));
    }
}
