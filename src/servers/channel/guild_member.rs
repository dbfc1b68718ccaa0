//! Guild membership records.
//!
//! Members and pending applicants come from one query; the helpers here
//! only read rows and write back the two fields hunters can change
//! themselves.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuildMember {
    pub guild_id: u32,
    pub char_id: u32,
    pub joined_at: Option<DateTime<Utc>>,
    pub souls: u32,
    pub rp_today: u16,
    pub rp_yesterday: u16,
    pub name: String,
    pub is_applicant: bool,
    pub order_index: u8,
    pub last_login: u32,
    pub recruiter: bool,
    pub avoid_leadership: bool,
    pub is_leader: bool,
    pub hrp: u16,
    pub gr: u16,
    pub weapon_id: u16,
    pub weapon_type: u16,
}

impl GuildMember {
    pub fn can_recruit(&self) -> bool {
        self.recruiter || self.is_sub_leader() || self.is_leader
    }

    /// Order indexes 0..=3 are the leader's deputies.
    pub fn is_sub_leader(&self) -> bool {
        self.order_index <= 3
    }

    /// Persist `avoid_leadership` and `order_index`.
    pub async fn save(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let res = sqlx::query(
            "UPDATE guild_characters SET avoid_leadership = $1, order_index = $2 WHERE character_id = $3"
        )
        .bind(self.avoid_leadership)
        .bind(self.order_index as i32)
        .bind(self.char_id as i32)
        .execute(pool)
        .await;

        if let Err(e) = res {
            tracing::error!(
                "[channel] [guild_member_save_failed] char_id={} guild_id={} err={}",
                self.char_id, self.guild_id, e
            );
            return Err(e);
        }
        Ok(())
    }
}

// Casts pin every column to a type sqlx decodes without surprises.
const GUILD_MEMBERS_SELECT_SQL: &str = r#"
SELECT
    g.id::int4 AS guild_id,
    gc.joined_at::timestamptz AS joined_at,
    COALESCE(souls, 0)::int4 AS souls,
    COALESCE(rp_today, 0)::int4 AS rp_today,
    COALESCE(rp_yesterday, 0)::int4 AS rp_yesterday,
    c.name,
    character.character_id::int4 AS character_id,
    COALESCE(gc.order_index, 0)::int4 AS order_index,
    c.last_login::int4 AS last_login,
    COALESCE(gc.recruiter, false) AS recruiter,
    COALESCE(gc.avoid_leadership, false) AS avoid_leadership,
    c.hrp::int4 AS hrp,
    c.gr::int4 AS gr,
    c.weapon_id::int4 AS weapon_id,
    c.weapon_type::int4 AS weapon_type,
    character.is_applicant,
    (g.leader_id = c.id) AS is_leader
    FROM (
        SELECT character_id, true AS is_applicant, guild_id
        FROM guild_applications ga
        WHERE ga.application_type = 'applied'
        UNION
        SELECT character_id, false AS is_applicant, guild_id
        FROM guild_characters gc
    ) character
    JOIN characters c ON character.character_id = c.id
    LEFT JOIN guild_characters gc ON gc.character_id = character.character_id
    JOIN guilds g ON g.id = character.guild_id
"#;

fn get_u32(row: &PgRow, col: &str) -> Result<u32, sqlx::Error> {
    let v: i32 = row.try_get(col)?;
    Ok(v as u32)
}

fn get_u16(row: &PgRow, col: &str) -> Result<u16, sqlx::Error> {
    let v: i32 = row.try_get(col)?;
    Ok(v.clamp(0, u16::MAX as i32) as u16)
}

fn member_from_row(row: &PgRow) -> Result<GuildMember, sqlx::Error> {
    let order_index: i32 = row.try_get("order_index")?;
    Ok(GuildMember {
        guild_id: get_u32(row, "guild_id")?,
        char_id: get_u32(row, "character_id")?,
        joined_at: row.try_get("joined_at")?,
        souls: get_u32(row, "souls")?,
        rp_today: get_u16(row, "rp_today")?,
        rp_yesterday: get_u16(row, "rp_yesterday")?,
        name: row.try_get("name")?,
        is_applicant: row.try_get("is_applicant")?,
        order_index: order_index.clamp(0, u8::MAX as i32) as u8,
        last_login: get_u32(row, "last_login")?,
        recruiter: row.try_get("recruiter")?,
        avoid_leadership: row.try_get("avoid_leadership")?,
        is_leader: row.try_get("is_leader")?,
        hrp: get_u16(row, "hrp")?,
        gr: get_u16(row, "gr")?,
        weapon_id: get_u16(row, "weapon_id")?,
        weapon_type: get_u16(row, "weapon_type")?,
    })
}

/// Members (or pending applicants, if `applicants`) of `guild_id`.
pub async fn get_guild_members(
    pool: &PgPool,
    guild_id: u32,
    applicants: bool,
) -> Result<Vec<GuildMember>, sqlx::Error> {
    let sql = format!(
        "{} WHERE character.guild_id = $1 AND is_applicant = $2",
        GUILD_MEMBERS_SELECT_SQL
    );
    let rows = sqlx::query(&sql)
        .bind(guild_id as i32)
        .bind(applicants)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            tracing::error!("[channel] [guild_members_failed] guild_id={} err={}", guild_id, e);
            e
        })?;

    rows.iter()
        .map(|row| {
            member_from_row(row).map_err(|e| {
                tracing::error!("[channel] [guild_member_decode_failed] guild_id={} err={}", guild_id, e);
                e
            })
        })
        .collect()
}

/// Membership row for `char_id`, or `None` if the character has no guild.
pub async fn get_character_guild_data(
    pool: &PgPool,
    char_id: u32,
) -> Result<Option<GuildMember>, sqlx::Error> {
    let sql = format!("{} WHERE character.character_id = $1", GUILD_MEMBERS_SELECT_SQL);
    let row = sqlx::query(&sql)
        .bind(char_id as i32)
        .fetch_optional(pool)
        .await
        .map_err(|e| {
            tracing::error!("[channel] [guild_data_failed] char_id={} err={}", char_id, e);
            e
        })?;

    match row {
        Some(row) => member_from_row(&row).map(Some).map_err(|e| {
            tracing::error!("[channel] [guild_member_decode_failed] char_id={} err={}", char_id, e);
            e
        }),
        None => Ok(None),
    }
}
