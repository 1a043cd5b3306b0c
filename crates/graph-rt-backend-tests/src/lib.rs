pub mod all_close;
pub mod conformance;
pub mod recording_backend;

pub use all_close::{all_close_f, all_close_f64, close_f, close_f64};

/// Expands the shared conformance suite into a test module for one backend.
///
/// `$backend_ctor` is any expression callable with no arguments that returns an
/// `Arc<impl Backend>`; it is invoked once per test, twice where two instances are needed.
#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use $crate::conformance;

            #[test]
            fn add_multiply_end_to_end() {
                let backend = ($backend_ctor)();
                conformance::add_multiply_end_to_end(&backend);
            }

            #[test]
            fn descriptors_match_function() {
                let backend = ($backend_ctor)();
                conformance::descriptors_match_function(&backend);
            }

            #[test]
            fn validation_rejects_mismatched_arguments() {
                let backend = ($backend_ctor)();
                conformance::validation_rejects_mismatched_arguments(&backend);
            }

            #[test]
            fn rejected_validation_never_executes() {
                let backend = ($backend_ctor)();
                conformance::rejected_validation_never_executes(&backend);
            }

            #[test]
            fn compile_is_idempotent() {
                let backend = ($backend_ctor)();
                conformance::compile_is_idempotent(&backend);
            }

            #[test]
            fn removed_handle_is_invalid() {
                let backend = ($backend_ctor)();
                conformance::removed_handle_is_invalid(&backend);
            }

            #[test]
            fn foreign_handle_is_invalid() {
                let backend = ($backend_ctor)();
                let other = ($backend_ctor)();
                conformance::foreign_handle_is_invalid(&backend, &other);
            }

            #[test]
            fn performance_data_follows_toggle() {
                let backend = ($backend_ctor)();
                conformance::performance_data_follows_toggle(&backend);
            }

            #[test]
            fn unsupported_nodes_fail_compilation() {
                let backend = ($backend_ctor)();
                conformance::unsupported_nodes_fail_compilation(&backend);
            }

            #[test]
            fn integer_and_structural_ops() {
                let backend = ($backend_ctor)();
                conformance::integer_and_structural_ops(&backend);
            }

            #[test]
            fn unused_parameters_still_take_a_slot() {
                let backend = ($backend_ctor)();
                conformance::unused_parameters_still_take_a_slot(&backend);
            }

            #[test]
            fn external_memory_tensors() {
                let backend = ($backend_ctor)();
                conformance::external_memory_tensors(&backend);
            }

            #[test]
            fn tensor_byte_ranges() {
                let backend = ($backend_ctor)();
                conformance::tensor_byte_ranges(&backend);
            }

            #[test]
            fn concurrent_calls_share_a_handle() {
                let backend = ($backend_ctor)();
                conformance::concurrent_calls_share_a_handle(&backend);
            }
        }
    };
}
