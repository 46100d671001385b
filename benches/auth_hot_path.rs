use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};

use mental::clock::{Clock, SystemClock};
use mental::config::AuthConfig;
use mental::identity::{AuthCore, AuthProvider, IdGenerator, LoginRequest, Operation, RegisterRequest};
use mental::security::CredentialHasher;
use mental::server::seed_default_catalog;
use mental::storage::{MemoryDirectory, MemoryKv};

struct PlainHasher;

impl CredentialHasher for PlainHasher {
    fn hash(&self, plaintext: &str) -> anyhow::Result<String> { Ok(plaintext.to_string()) }
    fn verify(&self, digest: &str, plaintext: &str) -> bool { digest == plaintext }
}

fn build_core() -> anyhow::Result<AuthCore> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dir = MemoryDirectory::new();
    seed_default_catalog(&dir);
    let cfg = AuthConfig::with_secrets("bench-access", "bench-refresh");
    AuthCore::build(&cfg, Arc::new(MemoryKv::new(clock.clone())), Arc::new(dir), Arc::new(PlainHasher), clock)
}

fn bench_idgen(c: &mut Criterion) {
    let mut group = c.benchmark_group("idgen");
    group.sampling_mode(SamplingMode::Flat);
    let n = 10_000u64;
    group.throughput(Throughput::Elements(n));
    group.bench_with_input(BenchmarkId::new("generate", n), &n, |b, &n| {
        let g = IdGenerator::from_host(Arc::new(SystemClock), 5);
        b.iter(|| {
            for _ in 0..n { criterion::black_box(g.generate().ok()); }
        });
    });
    group.finish();
}

fn bench_gate(c: &mut Criterion) {
    let core = build_core().expect("build auth core");
    let req = RegisterRequest { account: "bench".into(), password: "pw".into(), role_id: 1 };
    core.accounts.register(&req).expect("register bench account");
    let login = core.accounts.login(&LoginRequest { account: "bench".into(), password: "pw".into() }).expect("login bench account");
    let header = format!("Bearer {}", login.access_token);
    let op = Operation::new("/scl", "GET");

    let mut group = c.benchmark_group("gate");
    group.bench_function("authorize_warm_cache", |b| {
        b.iter(|| criterion::black_box(core.gate.authorize(Some(&header), &op).is_ok()));
    });
    group.bench_function("validate_access_token", |b| {
        b.iter(|| criterion::black_box(core.tokens.validate(&login.access_token, mental::identity::TokenKind::Access).is_ok()));
    });
    group.finish();
}

criterion_group!(benches, bench_idgen, bench_gate);
criterion_main!(benches);
