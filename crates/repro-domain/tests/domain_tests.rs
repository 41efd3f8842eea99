use chrono::NaiveDate;
use repro_domain::jdk;
use repro_domain::scmurl;
use repro_domain::tagmatch;
use repro_domain::{Newline, PackageId};

#[test]
fn package_id_structural_equality_and_display() {
    let a = PackageId::new("org.example", "lib", "1.0.0");
    let b = PackageId::new("org.example", "lib", "1.0.0");
    let c = PackageId::new("org.example", "lib", "1.0.1");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.to_string(), "org.example:lib:1.0.0");
    assert_eq!(a.group_as_path(), "org/example");
}

#[test]
fn scm_git_ssh_url_normalizes_to_probeable_https() {
    // Contrato de la cadena completa de transformaciones: el probe final debe
    // apuntar a https://github.com/owner/repo.git
    let mut url = "scm:git:git@github.com:owner/repo.git".to_string();
    let mut probed = Vec::new();
    for transform in scmurl::transform_chain() {
        let (n_url, changed) = transform(&url);
        if changed && !probed.contains(&n_url) {
            probed.push(n_url.clone());
        }
        if changed {
            url = n_url;
        }
    }
    assert!(probed.contains(&"https://github.com/owner/repo.git".to_string()),
            "probed urls: {probed:?}");
}

#[test]
fn tag_matching_is_list_order_dependent() {
    // foo-bar 1.2.3 con tres tags que matchean: gana el primero en orden de
    // lista; con la lista invertida gana el otro extremo.
    let list: Vec<String> = ["foo-bar-1.2.3", "v1.2.3", "bar-v1.2.3"].iter().map(|s| s.to_string()).collect();
    let first = tagmatch::matching_tag_indices(&list, "foo-bar", "1.2.3")[0];
    assert_eq!(list[first], "foo-bar-1.2.3");

    let reversed: Vec<String> = list.iter().rev().cloned().collect();
    let first_rev = tagmatch::matching_tag_indices(&reversed, "foo-bar", "1.2.3")[0];
    assert_eq!(reversed[first_rev], "bar-v1.2.3");
}

#[test]
fn jdk_selection_precedence_manifest_over_property() {
    let jdks = jdk::select_jdks(Some("17"), Some("1.8"), None, None);
    assert_eq!(jdks, vec!["17"]);
    let jdks = jdk::select_jdks(None, Some("1.8"), None, None);
    assert_eq!(jdks, vec!["8"]);
}

#[test]
fn jdk_lts_history_for_2016_package() {
    let publish = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
    let jdks = jdk::select_jdks(None, None, Some("7"), Some(publish));
    assert_eq!(jdks, vec!["7", "8"]);
}

#[test]
fn newline_roundtrip() {
    assert_eq!("lf".parse::<Newline>().unwrap(), Newline::Lf);
    assert_eq!("crlf".parse::<Newline>().unwrap(), Newline::Crlf);
    assert!("cr".parse::<Newline>().is_err());
    assert_eq!(Newline::Lf.to_string(), "lf");
}
