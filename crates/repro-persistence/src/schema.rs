//! Esquema Diesel (escrito a mano, paridad con las migraciones).

diesel::table! {
    packages (groupid, artifactid, version) {
        groupid -> Text,
        artifactid -> Text,
        version -> Text,
        scm_url -> Nullable<Text>,
        homepage_url -> Nullable<Text>,
        scm_conn_url -> Nullable<Text>,
        dev_conn_url -> Nullable<Text>,
        java_version_manifest_2 -> Nullable<Text>,
        java_version_manifest_3 -> Nullable<Text>,
        compiler_version_source -> Nullable<Text>,
        output_timestamp_prop -> Nullable<Text>,
        line_ending_lf -> Nullable<Bool>,
        line_ending_crlf -> Nullable<Bool>,
        line_ending_inconsistent_in_file -> Nullable<Bool>,
        lastmodified -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    hosts (groupid, artifactid, version) {
        groupid -> Text,
        artifactid -> Text,
        version -> Text,
        url -> Nullable<Text>,
        host -> Nullable<Text>,
        valid -> Nullable<Text>,
        url_home -> Nullable<Text>,
        host_home -> Nullable<Text>,
        valid_home -> Nullable<Text>,
        url_scm_conn -> Nullable<Text>,
        host_scm_conn -> Nullable<Text>,
        valid_scm_conn -> Nullable<Text>,
        url_dev_conn -> Nullable<Text>,
        host_dev_conn -> Nullable<Text>,
        valid_dev_conn -> Nullable<Text>,
        processed -> Bool,
    }
}

diesel::table! {
    tags (groupid, artifactid, version) {
        groupid -> Text,
        artifactid -> Text,
        version -> Text,
        tag_name -> Nullable<Text>,
        tag_commit_hash -> Nullable<Text>,
        release_name -> Nullable<Text>,
        release_tag_name -> Nullable<Text>,
        release_commit_hash -> Nullable<Text>,
        url -> Nullable<Text>,
    }
}

diesel::table! {
    builds (build_id) {
        build_id -> Int4,
        groupid -> Text,
        artifactid -> Text,
        version -> Text,
        jdk -> Text,
        newline -> Text,
        tool -> Text,
        from_existing -> Bool,
        build_success -> Nullable<Bool>,
        stdout -> Nullable<Text>,
        stderr -> Nullable<Text>,
        ok_files -> Nullable<Array<Text>>,
        ko_files -> Nullable<Array<Text>>,
        command -> Text,
    }
}

diesel::table! {
    jar_reproducibility (id) {
        id -> Int4,
        build_id -> Int4,
        archive -> Text,
        hash_mismatches -> Nullable<Array<Text>>,
        missing_files -> Nullable<Array<Text>>,
        extra_files -> Nullable<Array<Text>>,
    }
}

diesel::table! {
    errors (id) {
        id -> Int4,
        groupid -> Text,
        artifactid -> Text,
        version -> Text,
        url -> Nullable<Text>,
        error -> Text,
    }
}

diesel::joinable!(jar_reproducibility -> builds (build_id));

diesel::allow_tables_to_appear_in_same_query!(packages, hosts, tags, builds, jar_reproducibility, errors,);
