//! Resource kinds and their static profiles.
//!
//! A [`ResourceProfile`] is the per-kind configuration the reconciler and the
//! transports share: endpoint names, identity key priority, fields excluded
//! from change detection and which verbs the backend supports.

use serde::{Deserialize, Serialize};

/// Category of remote entity managed in MultiFlexi.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Application definition.
    Application,
    /// Customer company.
    Company,
    /// MultiFlexi user.
    User,
    /// Stored credential.
    Credential,
    /// Credential type (template for credentials).
    CredentialType,
    /// Job run record.
    Job,
    /// Scheduled run template binding an application to a company.
    RunTemplate,
    /// Topic used to tag applications.
    Topic,
    /// Assignment of an application to a company.
    CompanyApp,
    /// API token.
    Token,
    /// GDPR user data erasure request.
    ErasureRequest,
    /// Job queue.
    Queue,
    /// Encryption keys.
    Encryption,
}

/// Verbs the backend supports for a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Records can be created.
    pub create: bool,
    /// Records can be updated in place.
    pub update: bool,
    /// Records can be removed.
    pub remove: bool,
}

/// Static description of how a kind is addressed and compared.
#[derive(Debug, Clone, Copy)]
pub struct ResourceProfile {
    /// REST path segment for a single record.
    pub singular: &'static str,
    /// REST path segment for the collection.
    pub plural: &'static str,
    /// `multiflexi-cli` command noun.
    pub cli_noun: &'static str,
    /// Identity keys, most specific first.
    pub identity_keys: &'static [&'static str],
    /// Fields accepted on write but never returned for comparison.
    pub write_only: &'static [&'static str],
    /// Fields compared as unordered sets.
    pub set_fields: &'static [&'static str],
    /// Fields compared as booleans.
    pub bool_fields: &'static [&'static str],
    /// Fields required to create a record.
    pub required_on_create: &'static [&'static str],
    /// At least one of these fields is required to create a record.
    pub one_of_on_create: &'static [&'static str],
    /// Fields that together identify a record when no identity key matches.
    pub match_fields: &'static [&'static str],
    /// Alternative names accepted for identity keys, as `(alias, key)`.
    pub key_aliases: &'static [(&'static str, &'static str)],
    /// `multiflexi-cli` flags that differ from the dashed field name, as
    /// `(field, flag)`.
    pub flag_aliases: &'static [(&'static str, &'static str)],
    /// `multiflexi-cli` verb used for removal.
    pub remove_verb: &'static str,
    /// Supported verbs.
    pub capabilities: Capabilities,
}

const NONE: &[&str] = &[];

const NO_ALIASES: &[(&str, &str)] = &[];

const READ_ONLY: Capabilities = Capabilities {
    create: false,
    update: false,
    remove: false,
};

const UPDATE_ONLY: Capabilities = Capabilities {
    create: false,
    update: true,
    remove: false,
};

const NO_REMOVE: Capabilities = Capabilities {
    create: true,
    update: true,
    remove: false,
};

const FULL: Capabilities = Capabilities {
    create: true,
    update: true,
    remove: true,
};

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::Application,
        Self::Company,
        Self::User,
        Self::Credential,
        Self::CredentialType,
        Self::Job,
        Self::RunTemplate,
        Self::Topic,
        Self::CompanyApp,
        Self::Token,
        Self::ErasureRequest,
        Self::Queue,
        Self::Encryption,
    ];

    /// Returns the snake-case name used in configuration and result envelopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Company => "company",
            Self::User => "user",
            Self::Credential => "credential",
            Self::CredentialType => "credential_type",
            Self::Job => "job",
            Self::RunTemplate => "run_template",
            Self::Topic => "topic",
            Self::CompanyApp => "company_app",
            Self::Token => "token",
            Self::ErasureRequest => "erasure_request",
            Self::Queue => "queue",
            Self::Encryption => "encryption",
        }
    }

    /// Returns the static profile for this kind.
    #[must_use]
    pub const fn profile(self) -> &'static ResourceProfile {
        match self {
            Self::Application => &APPLICATION,
            Self::Company => &COMPANY,
            Self::User => &USER,
            Self::Credential => &CREDENTIAL,
            Self::CredentialType => &CREDENTIAL_TYPE,
            Self::Job => &JOB,
            Self::RunTemplate => &RUN_TEMPLATE,
            Self::Topic => &TOPIC,
            Self::CompanyApp => &COMPANY_APP,
            Self::Token => &TOKEN,
            Self::ErasureRequest => &ERASURE_REQUEST,
            Self::Queue => &QUEUE,
            Self::Encryption => &ENCRYPTION,
        }
    }

    /// Returns true if records of this kind can be driven by the reconciler.
    #[must_use]
    pub const fn is_reconcilable(self) -> bool {
        !matches!(self, Self::ErasureRequest | Self::Queue | Self::Encryption)
    }
}

impl ResourceProfile {
    /// Returns the priority of an identity key, lower is more specific.
    #[must_use]
    pub fn identity_rank(&self, key: &str) -> Option<usize> {
        self.identity_keys.iter().position(|k| *k == key)
    }

    /// Resolves an identity key alias to the key it stands for.
    #[must_use]
    pub fn canonical_key<'a>(&self, name: &'a str) -> &'a str {
        self.key_aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .map_or(name, |&(_, key)| key)
    }

    /// Returns the `multiflexi-cli` flag for a field, e.g. `--run-template-id`.
    #[must_use]
    pub fn cli_flag(&self, field: &str) -> String {
        self.flag_aliases
            .iter()
            .find(|(name, _)| *name == field)
            .map_or_else(
                || format!("--{}", field.replace('_', "-")),
                |(_, flag)| format!("--{flag}"),
            )
    }

    /// Returns true if the field is excluded from change detection.
    #[must_use]
    pub fn is_write_only(&self, field: &str) -> bool {
        self.write_only.contains(&field)
    }

    /// Returns true if the field is compared as an unordered set.
    #[must_use]
    pub fn is_set_field(&self, field: &str) -> bool {
        self.set_fields.contains(&field)
    }

    /// Returns true if the field is compared as a boolean.
    #[must_use]
    pub fn is_bool_field(&self, field: &str) -> bool {
        self.bool_fields.contains(&field)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const APPLICATION: ResourceProfile = ResourceProfile {
    singular: "app",
    plural: "apps",
    cli_noun: "application",
    identity_keys: &["id", "uuid", "name"],
    write_only: NONE,
    set_fields: &["tags"],
    bool_fields: &["enabled"],
    required_on_create: &["name"],
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: NO_REMOVE,
};

const COMPANY: ResourceProfile = ResourceProfile {
    singular: "company",
    plural: "companies",
    cli_noun: "company",
    identity_keys: &["id", "ic", "slug", "code", "name"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: &["enabled", "rw", "setup", "webhook"],
    required_on_create: &["name"],
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: FULL,
};

const USER: ResourceProfile = ResourceProfile {
    singular: "user",
    plural: "users",
    cli_noun: "user",
    identity_keys: &["id", "login", "email"],
    write_only: &["password"],
    set_fields: NONE,
    bool_fields: &["enabled"],
    required_on_create: &["login"],
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: NO_REMOVE,
};

const CREDENTIAL: ResourceProfile = ResourceProfile {
    singular: "credential",
    plural: "credentials",
    cli_noun: "credential",
    identity_keys: &["id", "name"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: UPDATE_ONLY,
};

const CREDENTIAL_TYPE: ResourceProfile = ResourceProfile {
    singular: "credential_type",
    plural: "credential_types",
    cli_noun: "credtype",
    identity_keys: &["id", "uuid", "name"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: UPDATE_ONLY,
};

const JOB: ResourceProfile = ResourceProfile {
    singular: "job",
    plural: "jobs",
    cli_noun: "job",
    identity_keys: &["id"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: NO_REMOVE,
};

const RUN_TEMPLATE: ResourceProfile = ResourceProfile {
    singular: "runtemplate",
    plural: "runtemplates",
    cli_noun: "runtemplate",
    identity_keys: &["id", "name"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: &["active"],
    required_on_create: &["name"],
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: FULL,
};

const TOPIC: ResourceProfile = ResourceProfile {
    singular: "topic",
    plural: "topics",
    cli_noun: "topic",
    identity_keys: &["id", "name"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: UPDATE_ONLY,
};

const COMPANY_APP: ResourceProfile = ResourceProfile {
    singular: "companyapp",
    plural: "companyapps",
    cli_noun: "companyapp",
    identity_keys: &["id"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: &["company_id"],
    one_of_on_create: &["app_id", "app_uuid"],
    match_fields: &["company_id", "app_id", "app_uuid"],
    key_aliases: &[("relation_id", "id")],
    flag_aliases: &[
        ("company_id", "company_id"),
        ("app_id", "app_id"),
        ("app_uuid", "app_uuid"),
    ],
    remove_verb: "delete",
    capabilities: FULL,
};

const TOKEN: ResourceProfile = ResourceProfile {
    singular: "token",
    plural: "tokens",
    cli_noun: "token",
    identity_keys: &["id"],
    write_only: &["token"],
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: &["user_id"],
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: &[("user_id", "user")],
    remove_verb: "remove",
    capabilities: NO_REMOVE,
};

const ERASURE_REQUEST: ResourceProfile = ResourceProfile {
    singular: "erasure_request",
    plural: "erasure_requests",
    cli_noun: "user:data-erasure",
    identity_keys: &["id"],
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: READ_ONLY,
};

const QUEUE: ResourceProfile = ResourceProfile {
    singular: "queue",
    plural: "queue",
    cli_noun: "queue",
    identity_keys: NONE,
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: READ_ONLY,
};

const ENCRYPTION: ResourceProfile = ResourceProfile {
    singular: "encryption",
    plural: "encryption",
    cli_noun: "encryption",
    identity_keys: NONE,
    write_only: NONE,
    set_fields: NONE,
    bool_fields: NONE,
    required_on_create: NONE,
    one_of_on_create: NONE,
    match_fields: NONE,
    key_aliases: NO_ALIASES,
    flag_aliases: NO_ALIASES,
    remove_verb: "remove",
    capabilities: READ_ONLY,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rank_prefers_id() {
        let profile = ResourceKind::Company.profile();
        assert_eq!(profile.identity_rank("id"), Some(0));
        assert!(profile.identity_rank("code") < profile.identity_rank("name"));
        assert_eq!(profile.identity_rank("email"), None);
    }

    #[test]
    fn test_kind_names_round_trip_through_serde() {
        for kind in ResourceKind::ALL {
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_operation_only_kinds_are_not_reconcilable() {
        assert!(!ResourceKind::Queue.is_reconcilable());
        assert!(!ResourceKind::Encryption.is_reconcilable());
        assert!(!ResourceKind::ErasureRequest.is_reconcilable());
        assert!(ResourceKind::Company.is_reconcilable());
    }

    #[test]
    fn test_cli_flag_uses_aliases() {
        assert_eq!(ResourceKind::Token.profile().cli_flag("user_id"), "--user");
        assert_eq!(
            ResourceKind::CompanyApp.profile().cli_flag("company_id"),
            "--company_id"
        );
        assert_eq!(
            ResourceKind::RunTemplate.profile().cli_flag("run_template_id"),
            "--run-template-id"
        );
    }

    #[test]
    fn test_relation_id_stands_for_id() {
        let profile = ResourceKind::CompanyApp.profile();
        assert_eq!(profile.canonical_key("relation_id"), "id");
        assert_eq!(profile.canonical_key("company_id"), "company_id");
        assert_eq!(profile.remove_verb, "delete");
    }

    #[test]
    fn test_company_ic_ranks_after_id() {
        let profile = ResourceKind::Company.profile();
        assert_eq!(profile.identity_rank("ic"), Some(1));
        assert!(profile.identity_rank("ic") < profile.identity_rank("slug"));
    }

    #[test]
    fn test_user_password_is_write_only() {
        assert!(ResourceKind::User.profile().is_write_only("password"));
        assert!(!ResourceKind::User.profile().is_write_only("email"));
    }
}
