// Named-object key derivation (fixed format strings, compatibility section).
//
// These functions produce the *human-readable key* passed to `NamedSem`/
// `NamedShm`, which then derive the final in-kernel name (see
// `NamedSem::open`'s `letters_only(key) + sha1_hex(key)` rule and
// `shm_name::make_shm_name` for the POSIX shm form).

use sha1::{Digest, Sha1};

/// Derive a connector's stable `uid` (§3.5) from its UUID string. Folding a
/// full sha1 digest down to 4 bytes keeps collisions between connectors in
/// the same process astronomically unlikely without needing a wider key
/// anywhere `uid` is stored (`ConnectorShm`/`RegistryShm` both use `u32`).
pub fn uid_from_uuid(uuid: &str) -> u32 {
    let mut hasher = Sha1::new();
    hasher.update(uuid.as_bytes());
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub fn connector_shm_key(session: &str, uid: u32) -> String {
    format!("_isl_shm_ses{session}_mdl{uid}")
}

pub fn variable_shm_key(session: &str, connect_id: &str) -> String {
    format!("_isl_shm_ses{session}_sig{connect_id}")
}

pub fn writer_wait_key(session: &str, connect_id: &str) -> String {
    format!("_isl_sem_ses{session}_swr{connect_id}")
}

pub fn reader_wait_key(session: &str, connect_id: &str) -> String {
    format!("_isl_sem_ses{session}_srd{connect_id}")
}

/// Global one-shot stop semaphore. The `%1%` placeholder in the source
/// format string is a fixed literal, not a parameter.
pub fn global_stop_key() -> String {
    "_isl_sem_xxx_".to_string()
}

pub fn session_stop_key(session: &str) -> String {
    format!("_isl_sem_xse{session}_")
}

/// Registry segment. Single global instance, `%1%` is a fixed literal.
pub fn registry_key() -> String {
    "_isl_shm_gen_".to_string()
}

pub fn legacy_fmi_master_kill_key() -> String {
    "_isl_sem_kill_fmimastersim_".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_embed_their_parameters() {
        assert_eq!(connector_shm_key("demo", 7), "_isl_shm_sesdemo_mdl7");
        assert_eq!(variable_shm_key("demo", "Token1W"), "_isl_shm_sesdemo_sigToken1W");
        assert_eq!(writer_wait_key("demo", "Token1W"), "_isl_sem_sesdemo_swrToken1W");
        assert_eq!(reader_wait_key("demo", "Token1W"), "_isl_sem_sesdemo_srdToken1W");
    }

    #[test]
    fn global_keys_are_fixed() {
        assert_eq!(global_stop_key(), "_isl_sem_xxx_");
        assert_eq!(registry_key(), "_isl_shm_gen_");
    }

    #[test]
    fn uid_from_uuid_is_deterministic_and_distinct() {
        assert_eq!(uid_from_uuid("abc"), uid_from_uuid("abc"));
        assert_ne!(uid_from_uuid("abc"), uid_from_uuid("def"));
    }
}
