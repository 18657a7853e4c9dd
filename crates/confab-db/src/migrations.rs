use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id           TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            last_status  TEXT NOT NULL DEFAULT 'offline',
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          TEXT PRIMARY KEY,
            kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            name        TEXT,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS participants (
            room_id       TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id       TEXT NOT NULL REFERENCES users(id),
            joined_at     TEXT NOT NULL,
            last_read_at  TEXT,
            muted         INTEGER NOT NULL DEFAULT 0,
            archived      INTEGER NOT NULL DEFAULT 0,
            is_admin      INTEGER NOT NULL DEFAULT 0,
            UNIQUE(room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            room_id          TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            sender_id        TEXT NOT NULL REFERENCES users(id),
            content          TEXT NOT NULL,
            kind             TEXT NOT NULL
                CHECK (kind IN ('text', 'image', 'video', 'audio', 'voice', 'document')),
            reply_to_id      TEXT REFERENCES messages(id) ON DELETE CASCADE,
            attachment_url   TEXT,
            attachment_name  TEXT,
            attachment_size  INTEGER,
            created_at       TEXT NOT NULL,
            edited           INTEGER NOT NULL DEFAULT 0,
            deleted          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
