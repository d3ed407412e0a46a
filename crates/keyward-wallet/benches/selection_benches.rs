//! Criterion benchmarks for coin selection and transfer building.
//!
//! Covers: oldest-first and largest-first selection over large UTXO sets,
//! and the full builder path including the heavy-transfer retry.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use keyward_core::address::{Address, Network};
use keyward_core::constants::SOMPI_PER_KAS;
use keyward_core::types::{Hash256, UnspentOutput};
use keyward_wallet::builder::TransactionBuilder;
use keyward_wallet::coin_selection::{SortPriority, UtxoSelector};

const CHAIN: u64 = 1_000_000;

fn owner() -> Address {
    Address::from_xonly([0x42; 32], Network::Testnet)
}

/// `n` confirmed outputs with scrambled scores and values.
fn make_utxos(n: usize) -> Vec<UnspentOutput> {
    let script = owner().script_public_key();
    (0..n)
        .map(|i| {
            let h = blake3::hash(&(i as u64).to_le_bytes());
            let bytes = h.as_bytes();
            let score = u64::from_le_bytes(bytes[..8].try_into().unwrap()) % (CHAIN / 2);
            let sats = 1_000 + u64::from_le_bytes(bytes[8..16].try_into().unwrap()) % SOMPI_PER_KAS;
            UnspentOutput {
                txid: Hash256(*bytes),
                vout: (i % 4) as u32,
                address: owner().to_string(),
                script_public_key: script.clone(),
                satoshis: sats,
                block_daa_score: score,
            }
        })
        .collect()
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    for n in [100usize, 1_000, 10_000] {
        let utxos = make_utxos(n);
        let total: u64 = utxos.iter().map(|u| u.satoshis).sum();
        let target = total / 2;
        for priority in [SortPriority::DaaScore, SortPriority::Satoshis] {
            group.bench_with_input(BenchmarkId::new(format!("{priority:?}"), n), &utxos, |b, utxos| {
                b.iter(|| UtxoSelector::select(black_box(utxos), target, CHAIN, 10, priority).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let utxos = make_utxos(2_000);
    let to = Address::from_xonly([0x07; 32], Network::Testnet);
    let builder = TransactionBuilder::new(owner());

    c.bench_function("build_small_transfer", |b| {
        b.iter(|| builder.build(black_box(&utxos), CHAIN, &to, SOMPI_PER_KAS).unwrap())
    });

    c.bench_function("build_heavy_transfer", |b| {
        b.iter(|| builder.build(black_box(&utxos), CHAIN, &to, 40 * SOMPI_PER_KAS))
    });
}

criterion_group!(benches, bench_select, bench_build);
criterion_main!(benches);
