mod common;

use std::time::Duration;

use bytes::Bytes;
use common::*;
use sombra_chain::chain::memory::Fault;
use sombra_chain::chain::{
    ChainMutation, Origin, Reconstructed, RequestKind, ResumePhase, ResumeScanner, StagedValue,
    TermOracle,
};
use sombra_chain::storage::{CounterMetrics, EdgeRef, KvStore, Phase, WriteBatch};
use sombra_chain::types::Term;
use sombra_chain::{ChainConfig, ChainError, RemoteError, ResumeOutcome, Result};
use tokio::sync::watch;

/// Writes `request` as a staged marker, as a coordinator that crashed right after staging would.
fn stage<M: ChainMutation>(cluster: &Cluster, request: M, phase: Phase) -> EdgeRef {
    let e = (*request.edges()[0]).clone();
    let key = cluster.out_key(&e);
    let mut batch = WriteBatch::new();
    batch.put(
        key.staged(phase).to_bytes(),
        StagedValue::new(request.into_mutation(), Origin::Fresh).encode(),
    );
    cluster.store.write_batch(SPACE, key.part(), batch).unwrap();
    e
}

fn real_key(cluster: &Cluster, e: &EdgeRef) -> Bytes {
    cluster.out_key(e).real().to_bytes()
}

#[tokio::test]
async fn factory_covers_every_kind_and_phase() -> Result<()> {
    let cluster = Cluster::new();
    let factory = cluster.env.resume_factory();
    let cases = [
        (RequestKind::Insert, ResumePhase::ResumeChain),
        (RequestKind::Insert, ResumePhase::ResumeRemote),
        (RequestKind::Update, ResumePhase::ResumeChain),
        (RequestKind::Update, ResumePhase::ResumeRemote),
        (RequestKind::Delete, ResumePhase::ResumeChain),
        (RequestKind::Delete, ResumePhase::ResumeRemote),
    ];
    for (i, (kind, phase)) in cases.into_iter().enumerate() {
        let e = edge(2 * i as i64 + 2, 1);
        let marker = phase.marker();
        match kind {
            RequestKind::Insert => stage(&cluster, insert(&[e.clone()], 1), marker),
            RequestKind::Update => stage(&cluster, update(&e, 1, true), marker),
            RequestKind::Delete => stage(&cluster, delete(&[e.clone()]), marker),
        };
        let found = factory
            .dispatch(SPACE, real_key(&cluster, &e), phase)?
            .expect("marker present");
        assert_eq!((found.kind(), found.phase()), (kind, phase));
    }
    Ok(())
}

#[tokio::test]
async fn delete_double_prime_selects_delete_reconstructor() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    cluster.client.script([Fault::DropRequest]);
    cluster.env.delete_edges(delete(&[e.clone()])).await?;

    let found = cluster.env.resume_factory().dispatch(
        SPACE,
        real_key(&cluster, &e),
        ResumePhase::ResumeRemote,
    )?;
    match found {
        Some(Reconstructed::DeleteResumeRemote(reconstructor)) => {
            assert_eq!(reconstructor.request().edges, vec![e.clone()]);
        }
        other => panic!("expected a delete reconstructor, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn insert_body_under_delete_kind_is_a_decode_error() {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    let key = cluster.out_key(&e);
    let mut raw = StagedValue::new(insert(&[e.clone()], 1).into_mutation(), Origin::Fresh)
        .encode()
        .to_vec();
    let kind_at = raw.len() - 2;
    raw[kind_at] = b'd';
    let mut batch = WriteBatch::new();
    batch.put(key.staged(Phase::DoublePrime).to_bytes(), Bytes::from(raw));
    cluster.store.write_batch(SPACE, P1, batch).unwrap();

    let err = cluster
        .env
        .resume_factory()
        .dispatch(SPACE, real_key(&cluster, &e), ResumePhase::ResumeRemote)
        .unwrap_err();
    assert!(matches!(err, ChainError::Decode(_)));

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await
        .unwrap();
    assert_eq!(stats.errors, 1);
    assert!(cluster.marker(&e, Phase::DoublePrime));
    assert!(!cluster.has_in(&e));
}

#[tokio::test]
async fn dispatch_of_resolved_marker_is_none() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    let found = cluster.env.resume_factory().dispatch(
        SPACE,
        real_key(&cluster, &e),
        ResumePhase::ResumeChain,
    )?;
    assert!(found.is_none());
    Ok(())
}

#[tokio::test]
async fn crashed_prime_is_committed_by_resume() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.committed, 1);
    assert_eq!(cluster.row(&cluster.out_key(&e)).as_ref().and_then(weight), Some(6));
    assert_eq!(cluster.row(&cluster.in_key(&e)).as_ref().and_then(weight), Some(6));
    assert_eq!(cluster.staged_count(), 0);
    assert_eq!(CounterMetrics::get(&cluster.metrics.resumed_committed), 1);
    Ok(())
}

/// Dispatches the prime of `e` and drives it under the current term.
async fn resume_prime(cluster: &Cluster, e: &EdgeRef, kind: RequestKind) -> Result<ResumeOutcome> {
    let mut found = cluster
        .env
        .resume_factory()
        .dispatch(SPACE, real_key(cluster, e), ResumePhase::ResumeChain)?
        .expect("prime present");
    assert_eq!((found.kind(), found.phase()), (kind, ResumePhase::ResumeChain));
    found.stamp_term(cluster.terms.current_term(SPACE, P1)?);
    found.resume().await
}

#[tokio::test]
async fn crashed_update_prime_is_committed_by_resume() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    stage(&cluster, update(&e, 7, false), Phase::Prime);

    let outcome = resume_prime(&cluster, &e, RequestKind::Update).await?;
    assert_eq!(outcome, ResumeOutcome::Committed);
    assert_eq!(cluster.row(&cluster.out_key(&e)).as_ref().and_then(weight), Some(7));
    assert_eq!(cluster.row(&cluster.in_key(&e)).as_ref().and_then(weight), Some(7));
    assert_eq!(cluster.staged_count(), 0);
    assert_eq!(cluster.env.locks().snapshot().held, 0);
    Ok(())
}

#[tokio::test]
async fn crashed_delete_prime_is_committed_by_resume() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    stage(&cluster, delete(&[e.clone()]), Phase::Prime);

    let outcome = resume_prime(&cluster, &e, RequestKind::Delete).await?;
    assert_eq!(outcome, ResumeOutcome::Committed);
    assert!(!cluster.has_out(&e));
    assert!(!cluster.has_in(&e));
    assert_eq!(cluster.staged_count(), 0);
    Ok(())
}

#[tokio::test]
async fn update_and_delete_primes_upgrade_then_converge() -> Result<()> {
    let cluster = Cluster::new();
    let (updated, deleted) = (edge(2, 1), edge(4, 1));
    cluster
        .env
        .insert_edges(insert(&[updated.clone(), deleted.clone()], 1))
        .await?;
    stage(&cluster, update(&updated, 7, false), Phase::Prime);
    stage(&cluster, delete(&[deleted.clone()]), Phase::Prime);
    // both primes fail, then both fresh double-primes of the same pass
    cluster.client.script(vec![Fault::DropRequest; 4]);
    let scanner = ResumeScanner::new(cluster.env.clone());

    let stats = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!((stats.upgraded, stats.pending), (2, 2));
    for e in [&updated, &deleted] {
        assert!(!cluster.marker(e, Phase::Prime));
        assert!(cluster.marker(e, Phase::DoublePrime));
    }
    assert_eq!(cluster.row(&cluster.out_key(&updated)).as_ref().and_then(weight), Some(7));
    assert_eq!(cluster.row(&cluster.in_key(&updated)).as_ref().and_then(weight), Some(1));
    assert!(!cluster.has_out(&deleted));
    assert!(cluster.has_in(&deleted));

    let stats = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!(stats.committed, 2);
    assert_eq!(cluster.staged_count(), 0);
    assert_eq!(cluster.row(&cluster.in_key(&updated)).as_ref().and_then(weight), Some(7));
    assert!(!cluster.has_in(&deleted));
    assert_eq!(cluster.edge_count(), 2);
    Ok(())
}

#[tokio::test]
async fn transport_failure_upgrades_prime() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    // the same pass also resends the fresh double-prime; lose that one too
    cluster.client.script(vec![Fault::DropRequest; 2]);
    let scanner = ResumeScanner::new(cluster.env.clone());

    let stats = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!(stats.upgraded, 1);
    assert_eq!(stats.pending, 1);
    assert!(cluster.has_out(&e));
    assert!(!cluster.has_in(&e));
    assert!(!cluster.marker(&e, Phase::Prime));
    let key = cluster.out_key(&e);
    let raw = cluster
        .store
        .get(SPACE, P1, key.staged(Phase::DoublePrime).as_bytes())
        .unwrap()
        .expect("double-prime written");
    assert_eq!(StagedValue::decode(&raw)?.origin, Origin::Upgraded);

    let stats = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!(stats.committed, 1);
    assert!(cluster.has_in(&e));
    assert_eq!(cluster.staged_count(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_prime_is_aborted() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    cluster
        .client
        .script([Fault::Reject(RemoteError::SchemaMismatch("dropped".into()))]);

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.aborted, 1);
    assert!(!cluster.has_out(&e));
    assert!(!cluster.has_in(&e));
    assert_eq!(cluster.staged_count(), 0);
    Ok(())
}

#[tokio::test]
async fn remote_leader_change_keeps_prime_pending() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    cluster.client.script(vec![Fault::LeaderChanged; 3]);

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.pending, 1);
    assert!(cluster.marker(&e, Phase::Prime));
    assert!(!cluster.has_out(&e));
    Ok(())
}

#[tokio::test]
async fn double_prime_survives_permanent_rejection() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.client.script([Fault::DropRequest]);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    cluster
        .client
        .script([Fault::Reject(RemoteError::Store("busy".into()))]);

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.pending, 1);
    assert!(cluster.marker(&e, Phase::DoublePrime));
    assert!(cluster.has_out(&e));
    Ok(())
}

#[tokio::test]
async fn repeated_resume_converges() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.client.script(vec![Fault::DropRequest; 3]);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;

    let scanner = ResumeScanner::new(cluster.env.clone());
    let mut passes = 0;
    while cluster.staged_count() > 0 {
        passes += 1;
        assert!(passes <= 5, "resume did not converge");
        scanner.scan_once(&cluster.parts()).await;
        assert!(!(cluster.marker(&e, Phase::Prime) && cluster.marker(&e, Phase::DoublePrime)));
    }
    assert_eq!(passes, 3);
    assert!(cluster.has_out(&e) && cluster.has_in(&e));
    Ok(())
}

#[tokio::test]
async fn reconstructor_for_resolved_marker_is_a_no_op() -> Result<()> {
    let cluster = Cluster::new();
    let e = edge(2, 1);
    cluster.client.script([Fault::DropReply]);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;

    let mut late = cluster
        .env
        .resume_factory()
        .dispatch(SPACE, real_key(&cluster, &e), ResumePhase::ResumeRemote)?
        .expect("double-prime present");
    ResumeScanner::new(cluster.env.clone())
        .scan_once(&cluster.parts())
        .await;
    assert_eq!(cluster.staged_count(), 0);
    let calls = cluster.client.calls();

    late.stamp_term(cluster.terms.bump(SPACE, P1));
    assert_eq!(late.resume().await?, ResumeOutcome::Skipped);
    assert_eq!(cluster.client.calls(), calls);
    assert_eq!(cluster.edge_count(), 2);
    assert_eq!(cluster.staged_count(), 0);
    Ok(())
}

#[tokio::test]
async fn stale_prime_reconstructor_cannot_touch_upgraded_marker() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    let mut late = cluster
        .env
        .resume_factory()
        .dispatch(SPACE, real_key(&cluster, &e), ResumePhase::ResumeChain)?
        .expect("prime present");

    cluster.client.script(vec![Fault::DropRequest; 2]);
    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.upgraded, 1);

    late.stamp_term(Term(1));
    assert_eq!(late.resume().await?, ResumeOutcome::Skipped);
    assert!(!cluster.marker(&e, Phase::Prime));
    assert!(cluster.marker(&e, Phase::DoublePrime));
    Ok(())
}

#[tokio::test]
async fn scanner_skips_edges_held_by_live_coordinators() -> Result<()> {
    let cluster = Cluster::with_config(ChainConfig::default().with_rpc_timeout_ms(300));
    let e = edge(2, 1);
    cluster.client.script([Fault::Hang]);
    let env = cluster.env.clone();
    let req = insert(&[e.clone()], 1);
    let live = tokio::spawn(async move { env.insert_edges(req).await });
    for _ in 0..100 {
        if cluster.marker(&e, Phase::Prime) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.conflicts, 1);
    assert!(cluster.marker(&e, Phase::Prime));

    live.await.expect("live insert panicked")?;
    assert!(cluster.marker(&e, Phase::DoublePrime));
    assert!(!cluster.marker(&e, Phase::Prime));
    Ok(())
}

#[tokio::test]
async fn stale_term_resume_writes_nothing() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    let mut late = cluster
        .env
        .resume_factory()
        .dispatch(SPACE, real_key(&cluster, &e), ResumePhase::ResumeChain)?
        .expect("prime present");
    late.stamp_term(Term(1));
    cluster.terms.bump(SPACE, P1);

    assert_eq!(late.resume().await.unwrap_err(), ChainError::LeaderChanged);
    assert!(cluster.marker(&e, Phase::Prime));
    assert!(!cluster.has_out(&e));
    assert!(!cluster.has_in(&e));
    assert_eq!(cluster.env.locks().snapshot().held, 0);
    Ok(())
}

#[tokio::test]
async fn scanner_ignores_partitions_led_elsewhere() -> Result<()> {
    let cluster = Cluster::new();
    let e = stage(&cluster, insert(&[edge(2, 1)], 6), Phase::Prime);
    cluster.terms.step_down(SPACE, P1);

    let stats = ResumeScanner::new(cluster.env.clone())
        .scan_partition(SPACE, P1)
        .await?;
    assert_eq!(stats.not_leader, 1);
    assert_eq!(stats.scanned, 0);
    assert!(cluster.marker(&e, Phase::Prime));
    Ok(())
}

#[tokio::test]
async fn scan_batch_limit_bounds_one_pass() -> Result<()> {
    let cluster = Cluster::with_config(ChainConfig::default().with_scan_batch_limit(2));
    for src in [2, 4, 6] {
        stage(&cluster, insert(&[edge(src, 1)], 1), Phase::Prime);
    }
    let scanner = ResumeScanner::new(cluster.env.clone());
    let first = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!(first.scanned, 2);
    let second = scanner.scan_partition(SPACE, P1).await?;
    assert_eq!(second.scanned, 1);
    assert_eq!(cluster.staged_count(), 0);
    Ok(())
}

#[tokio::test]
async fn background_scanner_drains_markers_and_stops() -> Result<()> {
    let cluster = Cluster::with_config(ChainConfig::default().with_scan_interval_ms(5));
    let e = edge(2, 1);
    cluster.client.script([Fault::DropRequest]);
    cluster.env.insert_edges(insert(&[e.clone()], 1)).await?;
    assert_eq!(cluster.staged_count(), 1);

    let (stop, shutdown) = watch::channel(false);
    let handle = ResumeScanner::new(cluster.env.clone()).spawn(cluster.parts(), shutdown);
    for _ in 0..200 {
        if cluster.staged_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cluster.staged_count(), 0);
    assert!(cluster.has_in(&e));

    stop.send(true).expect("scanner alive");
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scanner stopped")
        .expect("scanner panicked");
    Ok(())
}
