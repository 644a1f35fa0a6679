/*
    Tests for the anti-entropy subsystem

    - synchronizer_tests: handler-level behavior against a recording
      transport stub (request merging, replies, retry, disconnect fallback)
    - scenario_tests: the end-to-end flows over the in-memory mesh
    - convergence_tests: whole-mesh convergence properties
*/

pub mod convergence_tests;
pub mod scenario_tests;
