//! Property tests for the end-to-end resolver pipeline: soft-revoke
//! orthogonality (Share/Unshare toggles deterministically) over arbitrary
//! toggle sequences, keyed off a fixed actor set so each case only pays for
//! RSA key generation once.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use custody_ledger::Ledger;
use custody_registry::Registry;
use custody_resolver::{CustodyService, EnvelopeStore};
use custody_spec::primitives::{gen_rsa_keypair, public_key_to_pem};
use proptest::prelude::*;
use rsa::{RsaPrivateKey, RsaPublicKey};

struct FixedActors {
    lab_priv: RsaPrivateKey,
    lab_pub: RsaPublicKey,
    pat_priv: RsaPrivateKey,
    pat_pub: RsaPublicKey,
    hosp_priv: RsaPrivateKey,
    hosp_pub: RsaPublicKey,
}

fn fixed_actors() -> &'static FixedActors {
    static ACTORS: OnceLock<FixedActors> = OnceLock::new();
    ACTORS.get_or_init(|| {
        let (lab_priv, lab_pub) = gen_rsa_keypair().unwrap();
        let (pat_priv, pat_pub) = gen_rsa_keypair().unwrap();
        let (hosp_priv, hosp_pub) = gen_rsa_keypair().unwrap();
        FixedActors {
            lab_priv,
            lab_pub,
            pat_priv,
            pat_pub,
            hosp_priv,
            hosp_pub,
        }
    })
}

fn fresh_service(actors: &FixedActors) -> CustodyService {
    let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
    let ledger = Ledger::open(dir.path().join("ledger.jsonl")).unwrap();
    let store = EnvelopeStore::in_memory();
    let registry = Registry::in_memory();
    registry
        .enroll("LAB-1", &public_key_to_pem(&actors.lab_pub).unwrap())
        .unwrap();
    registry
        .enroll("PAT-1", &public_key_to_pem(&actors.pat_pub).unwrap())
        .unwrap();
    registry
        .enroll("HOSP-1", &public_key_to_pem(&actors.hosp_pub).unwrap())
        .unwrap();
    CustodyService::new(ledger, store, registry)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn share_unshare_toggles_access_deterministically(
        toggles in proptest::collection::vec(any::<bool>(), 1..10),
    ) {
        let actors = fixed_actors();
        let svc = fresh_service(actors);

        svc.emit(
            "R1",
            "LAB-1",
            &actors.lab_priv,
            "PAT-1",
            &actors.pat_pub,
            b"body",
            BTreeMap::new(),
        )
        .unwrap();

        let mut last_share = false;
        for share_now in &toggles {
            if *share_now {
                svc.share("R1", "PAT-1", &actors.pat_priv, "HOSP-1", &actors.hosp_pub)
                    .unwrap();
            } else {
                svc.unshare("R1", "PAT-1", "HOSP-1").unwrap();
            }
            last_share = *share_now;
        }

        let result = svc.open("HOSP-1", "R1", &actors.hosp_priv);
        prop_assert_eq!(result.is_ok(), last_share);
    }
}
