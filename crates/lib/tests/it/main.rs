/*! Integration tests for Arbor.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - tree: convergence and acyclicity of the replicated tree under reordering
 * - hlc: hybrid logical clock behaviour against a controllable wall clock
 * - replica: intents, recovery and persistence of a single replica
 * - sync: broadcast, anti-entropy and concurrent edits across replicas
 * - backend: the in-memory store and its file persistence
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("arbor=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod backend;
mod helpers;
mod hlc;
mod replica;
mod sync;
mod tree;
