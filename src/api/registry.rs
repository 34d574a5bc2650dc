//! URL-pattern dispatch from a self link to a resource kind.
//!
//! Patterns are tested in order; the first match wins and anything
//! unmatched is [`ResourceKind::Unknown`].

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::endpoint::ApiBase;

/// The kinds of resource the client knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Attachment,
    Component,
    CustomFieldOption,
    Dashboard,
    Filter,
    Issue,
    Comment,
    Votes,
    Watchers,
    Worklog,
    TimeTracking,
    IssueLink,
    IssueLinkType,
    IssueType,
    Priority,
    Project,
    Role,
    PermissionScheme,
    Resolution,
    SecurityLevel,
    Status,
    StatusCategory,
    User,
    Group,
    Version,
    Sprint,
    Board,
    Unknown,
}

impl ResourceKind {
    /// Stable lower-case name, used for batch-size configuration and logs.
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Attachment => "attachment",
            ResourceKind::Component => "component",
            ResourceKind::CustomFieldOption => "custom_field_option",
            ResourceKind::Dashboard => "dashboard",
            ResourceKind::Filter => "filter",
            ResourceKind::Issue => "issue",
            ResourceKind::Comment => "comment",
            ResourceKind::Votes => "votes",
            ResourceKind::Watchers => "watchers",
            ResourceKind::Worklog => "worklog",
            ResourceKind::TimeTracking => "time_tracking",
            ResourceKind::IssueLink => "issue_link",
            ResourceKind::IssueLinkType => "issue_link_type",
            ResourceKind::IssueType => "issue_type",
            ResourceKind::Priority => "priority",
            ResourceKind::Project => "project",
            ResourceKind::Role => "role",
            ResourceKind::PermissionScheme => "permission_scheme",
            ResourceKind::Resolution => "resolution",
            ResourceKind::SecurityLevel => "security_level",
            ResourceKind::Status => "status",
            ResourceKind::StatusCategory => "status_category",
            ResourceKind::User => "user",
            ResourceKind::Group => "group",
            ResourceKind::Version => "version",
            ResourceKind::Sprint => "sprint",
            ResourceKind::Board => "board",
            ResourceKind::Unknown => "unknown",
        }
    }

    /// The path used by `find`, with positional `{0}`, `{1}` placeholders.
    pub fn path_template(self) -> &'static str {
        match self {
            ResourceKind::Attachment => "attachment/{0}",
            ResourceKind::Component => "component/{0}",
            ResourceKind::CustomFieldOption => "customFieldOption/{0}",
            ResourceKind::Dashboard => "dashboard/{0}",
            ResourceKind::Filter => "filter/{0}",
            ResourceKind::Issue => "issue/{0}",
            ResourceKind::Comment => "issue/{0}/comment/{1}",
            ResourceKind::Votes => "issue/{0}/votes",
            ResourceKind::Watchers => "issue/{0}/watchers",
            ResourceKind::Worklog | ResourceKind::TimeTracking => "issue/{0}/worklog/{1}",
            ResourceKind::IssueLink => "issueLink/{0}",
            ResourceKind::IssueLinkType => "issueLinkType/{0}",
            ResourceKind::IssueType => "issuetype/{0}",
            ResourceKind::Priority => "priority/{0}",
            ResourceKind::Project => "project/{0}",
            ResourceKind::Role => "project/{0}/role/{1}",
            ResourceKind::PermissionScheme => "project/{0}/permissionscheme",
            ResourceKind::Resolution => "resolution/{0}",
            ResourceKind::SecurityLevel => "securitylevel/{0}",
            ResourceKind::Status => "status/{0}",
            ResourceKind::StatusCategory => "statuscategory/{0}",
            ResourceKind::User => "user?username={0}",
            ResourceKind::Group => "group?groupname={0}",
            ResourceKind::Version => "version/{0}",
            ResourceKind::Sprint => "sprint/{0}",
            ResourceKind::Board => "board/{0}",
            ResourceKind::Unknown => "unknown{0}",
        }
    }

    /// Which REST API the kind lives under.
    pub fn api_base(self) -> ApiBase {
        match self {
            ResourceKind::Sprint | ResourceKind::Board => ApiBase::Agile,
            _ => ApiBase::Core,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the dispatch table.
#[derive(Debug, Clone)]
pub struct ResourcePattern {
    pattern: Regex,
    kind: ResourceKind,
}

impl ResourcePattern {
    /// Compile a pattern. Patterns are searched, not anchored at the start.
    pub fn new(pattern: &str, kind: ResourceKind) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            kind,
        })
    }

    /// The kind, if `url` matches.
    pub fn try_match(&self, url: &str) -> Option<ResourceKind> {
        self.pattern.is_match(url).then_some(self.kind)
    }
}

const BUILTIN_PATTERNS: &[(&str, ResourceKind)] = &[
    (r"/attachment/[^/]+$", ResourceKind::Attachment),
    (r"/component/[^/]+$", ResourceKind::Component),
    (r"/customFieldOption/[^/]+$", ResourceKind::CustomFieldOption),
    (r"/dashboard/[^/]+$", ResourceKind::Dashboard),
    (r"/filter/[^/]+$", ResourceKind::Filter),
    (r"/issue/[^/]+$", ResourceKind::Issue),
    (r"/issue/[^/]+/comment/[^/]+$", ResourceKind::Comment),
    (r"/issue/[^/]+/votes$", ResourceKind::Votes),
    (r"/issue/[^/]+/watchers$", ResourceKind::Watchers),
    (r"/issue/[^/]+/worklog/[^/]+$", ResourceKind::Worklog),
    (r"/issueLink/[^/]+$", ResourceKind::IssueLink),
    (r"/issueLinkType/[^/]+$", ResourceKind::IssueLinkType),
    (r"/issuetype/[^/]+$", ResourceKind::IssueType),
    (r"/priority/[^/]+$", ResourceKind::Priority),
    (r"/project/[^/]+$", ResourceKind::Project),
    (r"/project/[^/]+/role/[^/]+$", ResourceKind::Role),
    (r"/project/[^/]+/permissionscheme[^/]*$", ResourceKind::PermissionScheme),
    (r"/resolution/[^/]+$", ResourceKind::Resolution),
    (r"/securitylevel/[^/]+$", ResourceKind::SecurityLevel),
    (r"/status/[^/]+$", ResourceKind::Status),
    (r"/statuscategory/[^/]+$", ResourceKind::StatusCategory),
    (r"/user\?(username|key|accountId).+$", ResourceKind::User),
    (r"/group\?groupname.+$", ResourceKind::Group),
    (r"/version/[^/]+$", ResourceKind::Version),
    (r"/sprints?/[^/]+$", ResourceKind::Sprint),
    (r"/(board|views)/[^/]+$", ResourceKind::Board),
];

fn builtin_patterns() -> &'static [ResourcePattern] {
    static PATTERNS: OnceLock<Vec<ResourcePattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BUILTIN_PATTERNS
            .iter()
            .filter_map(|(pattern, kind)| ResourcePattern::new(pattern, *kind).ok())
            .collect()
    })
}

/// An ordered, per-client dispatch table.
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    patterns: Vec<ResourcePattern>,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ResourceRegistry {
    /// The table covering every built-in kind.
    pub fn builtin() -> Self {
        Self {
            patterns: builtin_patterns().to_vec(),
        }
    }

    /// An empty table; everything resolves to [`ResourceKind::Unknown`].
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Add a pattern ahead of the existing ones.
    pub fn register(&mut self, pattern: ResourcePattern) {
        self.patterns.insert(0, pattern);
    }

    /// Resolve the kind of the resource at `url`.
    pub fn kind_for(&self, url: &str) -> ResourceKind {
        self.patterns
            .iter()
            .find_map(|p| p.try_match(url))
            .unwrap_or(ResourceKind::Unknown)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://jira.example.com/rest/api/2";

    #[test]
    fn test_every_builtin_pattern_compiles() {
        assert_eq!(ResourceRegistry::builtin().len(), BUILTIN_PATTERNS.len());
    }

    #[test]
    fn test_kind_for_core_urls() {
        let registry = ResourceRegistry::builtin();
        let cases = [
            ("attachment/10001", ResourceKind::Attachment),
            ("component/10003", ResourceKind::Component),
            ("customFieldOption/10010", ResourceKind::CustomFieldOption),
            ("dashboard/10000", ResourceKind::Dashboard),
            ("filter/10016", ResourceKind::Filter),
            ("issue/10000", ResourceKind::Issue),
            ("issue/PROJ-1", ResourceKind::Issue),
            ("issue/10000/comment/10001", ResourceKind::Comment),
            ("issue/10000/votes", ResourceKind::Votes),
            ("issue/10000/watchers", ResourceKind::Watchers),
            ("issue/10000/worklog/10020", ResourceKind::Worklog),
            ("issueLink/10020", ResourceKind::IssueLink),
            ("issueLinkType/10000", ResourceKind::IssueLinkType),
            ("issuetype/1", ResourceKind::IssueType),
            ("priority/2", ResourceKind::Priority),
            ("project/BULK", ResourceKind::Project),
            ("project/10000/role/10002", ResourceKind::Role),
            ("project/10000/permissionscheme", ResourceKind::PermissionScheme),
            ("resolution/1", ResourceKind::Resolution),
            ("securitylevel/10000", ResourceKind::SecurityLevel),
            ("status/1", ResourceKind::Status),
            ("statuscategory/2", ResourceKind::StatusCategory),
            ("user?username=admin", ResourceKind::User),
            ("user?accountId=5b10a2844c20165700ede21g", ResourceKind::User),
            ("group?groupname=jira-users", ResourceKind::Group),
            ("version/10000", ResourceKind::Version),
        ];
        for (path, expected) in cases {
            let url = format!("{}/{}", BASE, path);
            assert_eq!(registry.kind_for(&url), expected, "{}", url);
        }
    }

    #[test]
    fn test_kind_for_agile_urls() {
        let registry = ResourceRegistry::builtin();
        assert_eq!(
            registry.kind_for("https://jira.example.com/rest/agile/1.0/sprint/7"),
            ResourceKind::Sprint
        );
        assert_eq!(
            registry.kind_for("https://jira.example.com/rest/agile/1.0/board/3"),
            ResourceKind::Board
        );
        assert_eq!(ResourceKind::Sprint.api_base(), ApiBase::Agile);
        assert_eq!(ResourceKind::Issue.api_base(), ApiBase::Core);
    }

    #[test]
    fn test_unmatched_url_is_unknown() {
        let registry = ResourceRegistry::builtin();
        assert_eq!(registry.kind_for(&format!("{}/serverInfo", BASE)), ResourceKind::Unknown);
        assert_eq!(registry.kind_for(""), ResourceKind::Unknown);
        assert_eq!(ResourceRegistry::empty().kind_for(&format!("{}/issue/1", BASE)), ResourceKind::Unknown);
    }

    #[test]
    fn test_registered_pattern_takes_priority() {
        let mut registry = ResourceRegistry::builtin();
        registry.register(ResourcePattern::new(r"/issue/SPECIAL-[0-9]+$", ResourceKind::Unknown).unwrap());
        assert_eq!(registry.kind_for(&format!("{}/issue/SPECIAL-1", BASE)), ResourceKind::Unknown);
        assert_eq!(registry.kind_for(&format!("{}/issue/PROJ-1", BASE)), ResourceKind::Issue);
    }

    #[test]
    fn test_path_templates() {
        assert_eq!(ResourceKind::Role.path_template(), "project/{0}/role/{1}");
        assert_eq!(ResourceKind::Group.path_template(), "group?groupname={0}");
        assert_eq!(ResourceKind::IssueLinkType.to_string(), "issue_link_type");
    }
}
