//! Property-based test generators using proptest.

use proptest::prelude::*;

/// Strategy for passwords, including empty and non-ASCII ones.
pub fn password_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9 !@#$%^&*-]{1,32}",
        "\\PC{1,16}",
    ]
}

/// Strategy for arbitrary plaintexts up to 4 KiB.
pub fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

/// Strategy for item names inserted into the `items` table.
pub fn item_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}"
}

/// Strategy for batches of item names.
pub fn item_batch_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(item_name_strategy(), 1..20)
}
