use criterion::{criterion_group, criterion_main, Criterion};

use forgepool::blockchain::templates::{KaspaBlockHeader, KaspaBlockTemplate, KaspaParentLevel};
use forgepool::jobs::kaspa::{KaspaHashers, KaspaJob};
use forgepool::jobs::WorkerSnapshot;

fn kaspa_job() -> KaspaJob {
    let template = KaspaBlockTemplate {
        header: KaspaBlockHeader {
            version: 1,
            parents: vec![KaspaParentLevel {
                parent_hashes: vec!["11".repeat(32)],
            }],
            hash_merkle_root: "22".repeat(32),
            accepted_id_merkle_root: "33".repeat(32),
            utxo_commitment: "44".repeat(32),
            timestamp: 1_713_523_200_000,
            bits: 0x207fffff,
            nonce: 0,
            daa_score: 1_000_000,
            blue_score: 999_000,
            blue_work: "1b2d".to_string(),
            pruning_point: "55".repeat(32),
        },
        transactions: vec![],
    };
    KaspaJob::new(template, "bench".to_string(), KaspaHashers::kaspa()).unwrap()
}

fn bench_share_validation(c: &mut Criterion) {
    let job = kaspa_job();
    let worker = WorkerSnapshot {
        extranonce1: "0a0b0c0d".to_string(),
        difficulty: 0.000001,
        previous_difficulty: None,
        retargeted: false,
    };

    let mut nonce: u64 = 0;
    c.bench_function("kaspa_process_share", |b| {
        b.iter(|| {
            nonce += 1;
            let submitted = format!("{nonce:016x}");
            criterion::black_box(job.process_share(&worker, &submitted))
        })
    });

    c.bench_function("kaspa_job_init", |b| {
        b.iter(|| criterion::black_box(kaspa_job()))
    });
}

criterion_group!(benches, bench_share_validation);
criterion_main!(benches);
