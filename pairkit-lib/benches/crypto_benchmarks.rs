//! Cryptographic operation benchmarks
//!
//! These benchmarks measure the key agreement, topic derivation and envelope
//! operations every relay message goes through.
//!
//! Run with: `cargo bench --bench crypto_benchmarks`

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pairkit_lib::envelope::{derive_topic, Envelope};
use pairkit_lib::kms::{KeyManagementService, SymmetricKey};
use pairkit_lib::secure_storage::InMemoryKeyStorage;

/// Benchmark raw X25519 Diffie-Hellman
fn bench_x25519_key_agreement(c: &mut Criterion) {
    use x25519_dalek::{PublicKey, StaticSecret};

    let bob_secret = StaticSecret::random_from_rng(rand::thread_rng());
    let bob_public = PublicKey::from(&bob_secret);
    let alice_secret = StaticSecret::random_from_rng(rand::thread_rng());

    c.bench_function("x25519_diffie_hellman", |b| {
        b.iter(|| {
            let shared = alice_secret.diffie_hellman(black_box(&bob_public));
            black_box(shared)
        })
    });
}

/// Benchmark the full KMS agreement: private key lookup, DH and HKDF
fn bench_kms_agreement(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let kms = KeyManagementService::new(Arc::new(InMemoryKeyStorage::new()));
    let (own, peer) = runtime.block_on(async {
        let own = kms.generate_keypair().await.unwrap();
        let peer = kms.generate_keypair().await.unwrap();
        (own, peer)
    });

    c.bench_function("kms_agree_symmetric_key", |b| {
        b.iter(|| {
            let keys = runtime
                .block_on(kms.agree_symmetric_key(black_box(&own), black_box(&peer)))
                .unwrap();
            black_box(keys)
        })
    });
}

/// Benchmark HKDF key derivation with the agreement parameters
fn bench_hkdf_derive(c: &mut Criterion) {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let ikm = [7u8; 32];

    c.bench_function("hkdf_sha256_derive_32bytes", |b| {
        b.iter(|| {
            let hk = Hkdf::<Sha256>::new(None, black_box(&ikm));
            let mut okm = [0u8; 32];
            hk.expand(&[], &mut okm).unwrap();
            black_box(okm)
        })
    });
}

/// Benchmark topic derivation
fn bench_derive_topic(c: &mut Criterion) {
    let key = SymmetricKey::generate();

    c.bench_function("derive_topic", |b| {
        b.iter(|| {
            let topic = derive_topic(black_box(&key));
            black_box(topic)
        })
    });
}

/// Benchmark sealing envelopes of typical payload sizes
fn bench_envelope_seal(c: &mut Criterion) {
    let key = SymmetricKey::generate();

    let small_message = vec![0u8; 64];
    let medium_message = vec![0u8; 1024];
    let large_message = vec![0u8; 16384];

    let mut group = c.benchmark_group("envelope_seal");

    for (name, message) in [
        ("64_bytes", &small_message),
        ("1kb", &medium_message),
        ("16kb", &large_message),
    ] {
        group.throughput(Throughput::Bytes(message.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let encoded = Envelope::seal(black_box(message), &key, None)
                    .unwrap()
                    .to_base64();
                black_box(encoded)
            })
        });
    }

    group.finish();
}

/// Benchmark decoding and opening a 1KB envelope
fn bench_envelope_open(c: &mut Criterion) {
    let key = SymmetricKey::generate();
    let encoded = Envelope::seal(&[0u8; 1024], &key, None).unwrap().to_base64();

    c.bench_function("envelope_open_1kb", |b| {
        b.iter(|| {
            let plaintext = Envelope::from_base64(black_box(&encoded))
                .unwrap()
                .open(&key)
                .unwrap();
            black_box(plaintext)
        })
    });
}

criterion_group!(
    crypto_benches,
    bench_x25519_key_agreement,
    bench_kms_agreement,
    bench_hkdf_derive,
    bench_derive_topic,
    bench_envelope_seal,
    bench_envelope_open,
);

criterion_main!(crypto_benches);
