/*
    Integration tests for core_store subsystem

    Test suite covering:
    - Merge laws (commutativity, associativity, idempotence)
    - Multi-replica convergence through the node store
    - Storage persistence across reopen
*/

pub mod persistence_tests;
