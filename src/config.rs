use std::env;

use anyhow::Context as _;
use chrono::FixedOffset;
use serenity::all::{RoleId, UserId};

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_OFFSET_HOURS: i32 = 2;

const DEFAULT_LOGO_URL: &str =
    "https://cdn.discordapp.com/attachments/1184622314302754857/1420796249484824757/RInmPqb.webp";
const DEFAULT_ZANCUDO_IMAGE_URL: &str =
    "https://cdn.discordapp.com/attachments/1224129510535069766/1414194392214011974/image.png";
const DEFAULT_CAYO_IMAGE_URL: &str =
    "https://cdn.discordapp.com/attachments/1224129510535069766/1414204332747915274/image.png";

/// Artwork used by the announcement embeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    pub logo: String,
    pub zancudo: String,
    pub cayo: String,
}

impl Default for Artwork {
    fn default() -> Self {
        Self {
            logo: DEFAULT_LOGO_URL.to_owned(),
            zancudo: DEFAULT_ZANCUDO_IMAGE_URL.to_owned(),
            cayo: DEFAULT_CAYO_IMAGE_URL.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub port: u16,
    pub admin_role: Option<RoleId>,
    pub pick_role: Option<RoleId>,
    pub status_admins: Vec<UserId>,
    pub offset: FixedOffset,
    pub artwork: Artwork,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let token = get("DISCORD_BOT_TOKEN")
            .context("DISCORD_BOT_TOKEN is not set (environment or .env)")?;

        let port = match get("PORT") {
            Some(port) => port.parse().with_context(|| format!("invalid PORT {port:?}"))?,
            None => DEFAULT_PORT,
        };

        let admin_role = get("ADMIN_ROLE_ID")
            .map(|id| parse_id(&id).map(RoleId::new))
            .transpose()
            .context("invalid ADMIN_ROLE_ID")?;
        let pick_role = get("PICK_ROLE_ID")
            .map(|id| parse_id(&id).map(RoleId::new))
            .transpose()
            .context("invalid PICK_ROLE_ID")?;

        let status_admins = get("STATUS_ADMINS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(|id| parse_id(id).map(UserId::new))
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()
            .context("invalid STATUS_ADMINS")?
            .unwrap_or_default();

        let hours = match get("TIMEZONE_OFFSET_HOURS") {
            Some(hours) => hours
                .parse::<i32>()
                .with_context(|| format!("invalid TIMEZONE_OFFSET_HOURS {hours:?}"))?,
            None => DEFAULT_OFFSET_HOURS,
        };
        let offset = FixedOffset::east_opt(hours * 3600)
            .with_context(|| format!("TIMEZONE_OFFSET_HOURS out of range: {hours}"))?;

        let defaults = Artwork::default();
        let artwork = Artwork {
            logo: get("LOGO_URL").unwrap_or(defaults.logo),
            zancudo: get("ZANCUDO_IMAGE_URL").unwrap_or(defaults.zancudo),
            cayo: get("CAYO_IMAGE_URL").unwrap_or(defaults.cayo),
        };

        Ok(Self {
            token,
            port,
            admin_role,
            pick_role,
            status_admins,
            offset,
            artwork,
        })
    }

    pub fn is_status_admin(&self, user: UserId) -> bool {
        self.status_admins.contains(&user)
    }

    /// Admin marker: either a listed user or a holder of the admin role.
    pub fn is_admin(&self, user: UserId, roles: &[RoleId]) -> bool {
        self.is_status_admin(user) || self.admin_role.is_some_and(|role| roles.contains(&role))
    }

    pub fn can_pick(&self, user: UserId, roles: &[RoleId]) -> bool {
        self.is_admin(user, roles) || self.pick_role.is_some_and(|role| roles.contains(&role))
    }
}

fn parse_id(raw: &str) -> anyhow::Result<u64> {
    let id: u64 = raw.parse().with_context(|| format!("{raw:?} is not a snowflake"))?;
    anyhow::ensure!(id != 0, "snowflake must be non-zero");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DISCORD_BOT_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn defaults() {
        let config = config(&[("DISCORD_BOT_TOKEN", "abc")]).unwrap();
        assert_eq!(config.port, 10000);
        assert_eq!(config.offset, FixedOffset::east_opt(7200).unwrap());
        assert!(config.admin_role.is_none());
        assert!(config.status_admins.is_empty());
        assert_eq!(config.artwork, Artwork::default());
    }

    #[test]
    fn parses_allowlists() {
        let config = config(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("PORT", "8080"),
            ("ADMIN_ROLE_ID", "42"),
            ("PICK_ROLE_ID", "43"),
            ("STATUS_ADMINS", "1, 2,,3"),
            ("TIMEZONE_OFFSET_HOURS", "1"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.admin_role, Some(RoleId::new(42)));
        assert_eq!(config.pick_role, Some(RoleId::new(43)));
        assert_eq!(
            config.status_admins,
            vec![UserId::new(1), UserId::new(2), UserId::new(3)]
        );
        assert_eq!(config.offset, FixedOffset::east_opt(3600).unwrap());
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(config(&[("DISCORD_BOT_TOKEN", "abc"), ("ADMIN_ROLE_ID", "admins")]).is_err());
        assert!(config(&[("DISCORD_BOT_TOKEN", "abc"), ("STATUS_ADMINS", "1,x")]).is_err());
        assert!(config(&[("DISCORD_BOT_TOKEN", "abc"), ("PICK_ROLE_ID", "0")]).is_err());
        assert!(config(&[("DISCORD_BOT_TOKEN", "abc"), ("PORT", "99999")]).is_err());
    }

    #[test]
    fn admin_markers() {
        let config = config(&[
            ("DISCORD_BOT_TOKEN", "abc"),
            ("ADMIN_ROLE_ID", "10"),
            ("PICK_ROLE_ID", "11"),
            ("STATUS_ADMINS", "5"),
        ])
        .unwrap();
        let admin_role = [RoleId::new(10)];
        let pick_role = [RoleId::new(11)];

        assert!(config.is_admin(UserId::new(5), &[]));
        assert!(config.is_admin(UserId::new(6), &admin_role));
        assert!(!config.is_admin(UserId::new(6), &pick_role));

        assert!(config.can_pick(UserId::new(6), &pick_role));
        assert!(config.can_pick(UserId::new(6), &admin_role));
        assert!(!config.can_pick(UserId::new(6), &[RoleId::new(99)]));

        assert!(config.is_status_admin(UserId::new(5)));
        assert!(!config.is_status_admin(UserId::new(6)));
    }
}
