//! Name lookup for the `search` command.

/// Most results returned by one search.
pub const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogGame {
    pub name: &'static str,
    pub game_id: &'static str,
}

pub trait GameCatalog {
    /// Games whose name contains `query`, case-insensitively, in catalog order,
    /// at most [`MAX_RESULTS`].
    fn search(&self, query: &str) -> Vec<CatalogGame>;
}

/// A fixed table of popular titles. Not a search engine.
pub struct StaticCatalog {
    games: &'static [CatalogGame],
}

const POPULAR_GAMES: &[CatalogGame] = &[
    CatalogGame { name: "Counter-Strike 2", game_id: "730" },
    CatalogGame { name: "Dota 2", game_id: "570" },
    CatalogGame { name: "Team Fortress 2", game_id: "440" },
    CatalogGame { name: "Half-Life 2", game_id: "220" },
    CatalogGame { name: "Portal 2", game_id: "620" },
    CatalogGame { name: "Left 4 Dead 2", game_id: "550" },
    CatalogGame { name: "Garry's Mod", game_id: "4000" },
    CatalogGame { name: "Terraria", game_id: "105600" },
    CatalogGame { name: "Stardew Valley", game_id: "413150" },
    CatalogGame { name: "The Witcher 3", game_id: "292030" },
];

impl StaticCatalog {
    pub fn new() -> Self {
        Self { games: POPULAR_GAMES }
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl GameCatalog for StaticCatalog {
    fn search(&self, query: &str) -> Vec<CatalogGame> {
        let needle = query.trim().to_lowercase();
        self.games
            .iter()
            .filter(|g| g.name.to_lowercase().contains(&needle))
            .take(MAX_RESULTS)
            .copied()
            .collect()
    }
}
