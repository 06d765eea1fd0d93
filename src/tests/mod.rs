mod helpers;
mod key_derivation_tests;
mod reestablish_tests;
mod store_tests;
mod switch_tests;
mod vectors_bolt3;
