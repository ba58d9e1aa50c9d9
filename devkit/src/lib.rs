/*!
# Meross DevKit - Stubs et fixtures pour tester l'exporter

- `CloudStub` : faux cloud Meross HTTP (signIn / devList) qui vérifie les
  signatures et enregistre chaque requête
- `fixtures` : enregistrements de devices et payloads électricité
- `init_test_logging` : logs des stubs dans la sortie des tests
*/

pub mod cloud_stub;
pub mod fixtures;

pub use cloud_stub::{CloudStub, RecordedRequest, StubAccount};

/// Active env_logger pour les tests (idempotent)
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}
