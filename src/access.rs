use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Functional areas that permissions are granted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Inventory,
    Grades,
    Accessibility,
    Maintenance,
}

impl Module {
    pub const ALL: [Module; 4] = [
        Module::Inventory,
        Module::Grades,
        Module::Accessibility,
        Module::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Module::Inventory => "inventory",
            Module::Grades => "grades",
            Module::Accessibility => "accessibility",
            Module::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inventory" => Some(Module::Inventory),
            "grades" => Some(Module::Grades),
            "accessibility" => Some(Module::Accessibility),
            "maintenance" => Some(Module::Maintenance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Edit,
    Create,
    Delete,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Edit => "edit",
            Action::Create => "create",
            Action::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Action::Read),
            "edit" => Some(Action::Edit),
            "create" => Some(Action::Create),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// One stored permission row's capability bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub read: bool,
    pub edit: bool,
    pub create: bool,
    pub delete: bool,
}

impl Capabilities {
    pub fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.read,
            Action::Edit => self.edit,
            Action::Create => self.create,
            Action::Delete => self.delete,
        }
    }
}

/// The acting identity of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

/// Where permission rows come from. The workspace database is the only
/// production source; tests plug in maps.
pub trait PermissionSource {
    fn capabilities(&self, user_id: &str, module: Module) -> anyhow::Result<Option<Capabilities>>;
}

/// Decides a single request. Admins pass before anything else is looked at;
/// everyone else needs an explicit row, and no row means no access.
/// `stored` must be the principal's row for the module being checked; use
/// [`authorize_with`] to have it looked up.
pub fn authorize(
    principal: &Principal,
    action: Action,
    stored: Option<&Capabilities>,
) -> bool {
    if principal.role == Role::Admin {
        return true;
    }
    stored.map(|c| c.allows(action)).unwrap_or(false)
}

/// [`authorize`] with the row fetched from `source`. The source is never
/// consulted for admins.
pub fn authorize_with<S: PermissionSource + ?Sized>(
    principal: &Principal,
    module: Module,
    action: Action,
    source: &S,
) -> anyhow::Result<bool> {
    if principal.role == Role::Admin {
        return Ok(true);
    }
    let stored = source.capabilities(&principal.user_id, module)?;
    Ok(authorize(principal, action, stored.as_ref()))
}

impl PermissionSource for Connection {
    fn capabilities(&self, user_id: &str, module: Module) -> anyhow::Result<Option<Capabilities>> {
        self.query_row(
            "SELECT can_read, can_edit, can_create, can_delete
             FROM permissions
             WHERE user_id = ? AND module = ?",
            (user_id, module.as_str()),
            |r| {
                Ok(Capabilities {
                    read: r.get::<_, i64>(0)? != 0,
                    edit: r.get::<_, i64>(1)? != 0,
                    create: r.get::<_, i64>(2)? != 0,
                    delete: r.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()
        .with_context(|| format!("failed to load {} permission for {}", module.as_str(), user_id))
    }
}

/// Looks up the stored role of `user_id`.
pub fn load_principal(conn: &Connection, user_id: &str) -> anyhow::Result<Option<Principal>> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()
        .context("failed to load user role")?;
    let Some(role) = role else {
        return Ok(None);
    };
    let role = Role::parse(&role).ok_or_else(|| anyhow::anyhow!("unknown role {}", role))?;
    Ok(Some(Principal {
        user_id: user_id.to_string(),
        role,
    }))
}
