//! Proptest strategies for Gatehouse values.

use proptest::prelude::*;

use gatehouse_core::{Category, Iv, ObjectId, TokenSecret, UserId};

/// Lowercase names the engine accepts for categories and permissions.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,30}"
}

/// Primary (non-meta) categories.
pub fn category_strategy() -> impl Strategy<Value = Category> {
    name_strategy().prop_map(Category::new)
}

/// User ids in a realistic range.
pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    (1i64..1_000_000).prop_map(UserId)
}

/// Object ids for scoped grants.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    (1i64..1_000_000).prop_map(ObjectId)
}

/// Validity windows with `valid_from <= expires_at`.
pub fn token_window_strategy() -> impl Strategy<Value = (i64, i64)> {
    (0i64..i64::MAX / 2).prop_flat_map(|from| (Just(from), from..i64::MAX / 2 + 1))
}

/// IVs including the degenerate all-zero value.
pub fn iv_strategy() -> impl Strategy<Value = Iv> {
    prop_oneof![
        1 => Just(Iv::ZERO),
        9 => any::<[u8; 12]>().prop_map(Iv::from_bytes),
    ]
}

/// Token MAC secrets.
pub fn secret_strategy() -> impl Strategy<Value = TokenSecret> {
    any::<[u8; 32]>().prop_map(TokenSecret::from_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{token_mac, InstanceMode, KexKeypair};
    use gatehouse_session::KexManager;

    proptest! {
        /// Whatever IV the client presents, the stored session IV is never
        /// zero.
        #[test]
        fn prop_kex_session_iv_never_zero(client_iv in iv_strategy()) {
            let manager = KexManager::new(InstanceMode::Full);
            let client = KexKeypair::generate();

            let offer = manager
                .initiate(&client.public_key(), &client_iv, "prop", 0)
                .unwrap();
            prop_assert!(!offer.server_iv.is_zero());

            let session = manager.consume(offer.request_id, 0).unwrap();
            prop_assert!(!session.iv.is_zero());
        }

        /// The token MAC commits to every input.
        #[test]
        fn prop_token_mac_commits_to_window(
            secret in secret_strategy(),
            user in user_id_strategy(),
            (from, until) in token_window_strategy(),
        ) {
            let salt = b"fixed-salt-16byt";
            let token = token_mac(&secret, user, salt, from, until);

            prop_assert_eq!(token, token_mac(&secret, user, salt, from, until));
            prop_assert_ne!(token, token_mac(&secret, user, salt, from, until + 1));
            prop_assert_ne!(token, token_mac(&secret, UserId(user.0 + 1), salt, from, until));
        }

        /// Category / meta-category pairing round-trips for any valid name.
        #[test]
        fn prop_grant_meta_pairing(category in category_strategy()) {
            let meta = category.grant_meta();
            prop_assert!(meta.is_grant_meta());
            prop_assert_eq!(meta.primary(), category);
        }
    }
}
