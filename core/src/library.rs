use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::Storage;
use crate::types::{current_millis, FavoriteRecord, HiddenTombstone, Story};

/// お気に入りと非表示マーカー
///
/// どちらもローカル専用で、サーバーには送らない。
/// 一覧を表示する側は必ず `visible` / `visible_favorites` を通す。
pub struct StoryLibrary {
    storage: Arc<dyn Storage>,
}

impl StoryLibrary {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// オフライン表示用にストーリーのスナップショットを保存
    pub async fn add_favorite(&self, story: &Story) -> Result<()> {
        self.storage
            .put_record(&FavoriteRecord {
                story: story.clone(),
                saved_at: current_millis(),
            })
            .await?;
        log::info!("Favorite saved: {}", story.id);
        Ok(())
    }

    pub async fn remove_favorite(&self, id: &str) -> Result<()> {
        self.storage.delete_record::<FavoriteRecord>(id).await?;
        log::info!("Favorite removed: {}", id);
        Ok(())
    }

    pub async fn is_favorite(&self, id: &str) -> Result<bool> {
        Ok(self.storage.get_record::<FavoriteRecord>(id).await?.is_some())
    }

    /// お気に入りの切り替え。切り替え後にお気に入りならtrue
    pub async fn toggle_favorite(&self, story: &Story) -> Result<bool> {
        if self.is_favorite(&story.id).await? {
            self.remove_favorite(&story.id).await?;
            Ok(false)
        } else {
            self.add_favorite(story).await?;
            Ok(true)
        }
    }

    /// 保存日時の新しい順
    pub async fn favorites(&self) -> Result<Vec<FavoriteRecord>> {
        let mut favorites: Vec<FavoriteRecord> = self.storage.get_all_records().await?;
        favorites.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(favorites)
    }

    pub async fn hide(&self, id: &str) -> Result<()> {
        self.storage
            .put_record(&HiddenTombstone {
                id: id.to_string(),
                hidden_at: current_millis(),
            })
            .await?;
        log::info!("Story hidden: {}", id);
        Ok(())
    }

    pub async fn unhide(&self, id: &str) -> Result<()> {
        self.storage.delete_record::<HiddenTombstone>(id).await
    }

    pub async fn hidden_ids(&self) -> Result<HashSet<String>> {
        let tombstones: Vec<HiddenTombstone> = self.storage.get_all_records().await?;
        Ok(tombstones.into_iter().map(|t| t.id).collect())
    }

    /// 非表示のストーリーを除いた一覧
    ///
    /// ストアが使えない場合はマーカーも存在しえないので、そのまま返す。
    pub async fn visible(&self, stories: Vec<Story>) -> Result<Vec<Story>> {
        match self.hidden_ids().await {
            Ok(hidden) => Ok(apply_tombstones(stories, &hidden)),
            Err(e) if e.is_storage_unavailable() => {
                log::warn!("Hidden markers unavailable: {}", e);
                Ok(stories)
            }
            Err(e) => Err(e),
        }
    }

    /// 非表示のものを除いたお気に入り
    pub async fn visible_favorites(&self) -> Result<Vec<Story>> {
        let favorites = self.favorites().await?.into_iter().map(|f| f.story).collect();
        let hidden = self.hidden_ids().await?;
        Ok(apply_tombstones(favorites, &hidden))
    }

    /// 自分の投稿だけ（非表示のものは除く）
    ///
    /// APIは投稿者IDを返さないので名前で照合する。
    pub async fn my_stories(&self, stories: Vec<Story>, user_name: &str) -> Result<Vec<Story>> {
        let visible = self.visible(stories).await?;
        Ok(visible.into_iter().filter(|s| s.name == user_name).collect())
    }
}

pub fn apply_tombstones(stories: Vec<Story>, hidden: &HashSet<String>) -> Vec<Story> {
    stories.into_iter().filter(|s| !hidden.contains(&s.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockStorage;
    use crate::storage::UnavailableStorage;

    fn story(id: &str) -> Story {
        Story {
            id: id.to_string(),
            name: "Dimas".to_string(),
            description: format!("story {}", id),
            photo_url: format!("https://story-api.dicoding.dev/images/stories/{}.jpg", id),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            lat: None,
            lon: None,
        }
    }

    #[tokio::test]
    async fn test_toggle_favorite() {
        let library = StoryLibrary::new(Arc::new(MockStorage::new()));

        assert!(library.toggle_favorite(&story("1")).await.unwrap());
        assert!(library.is_favorite("1").await.unwrap());
        assert_eq!(library.favorites().await.unwrap()[0].story, story("1"));

        assert!(!library.toggle_favorite(&story("1")).await.unwrap());
        assert!(!library.is_favorite("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_hidden_story_is_excluded_even_when_favorite() {
        let library = StoryLibrary::new(Arc::new(MockStorage::new()));
        library.add_favorite(&story("1")).await.unwrap();
        library.add_favorite(&story("2")).await.unwrap();
        library.hide("1").await.unwrap();

        let feed = library.visible(vec![story("1"), story("2"), story("3")]).await.unwrap();
        let ids: Vec<&str> = feed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);

        let favorites = library.visible_favorites().await.unwrap();
        assert_eq!(favorites, vec![story("2")]);
        // マーカーはお気に入り自体を消さない
        assert!(library.is_favorite("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_my_stories_filters_by_author_and_tombstones() {
        let library = StoryLibrary::new(Arc::new(MockStorage::new()));
        let mut someone_else = story("3");
        someone_else.name = "Arif".to_string();
        library.hide("2").await.unwrap();

        let mine = library
            .my_stories(vec![story("1"), story("2"), someone_else], "Dimas")
            .await
            .unwrap();
        assert_eq!(mine, vec![story("1")]);
    }

    #[tokio::test]
    async fn test_unhide_restores_story() {
        let library = StoryLibrary::new(Arc::new(MockStorage::new()));
        library.hide("1").await.unwrap();
        library.unhide("1").await.unwrap();

        assert_eq!(library.visible(vec![story("1")]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_visible_without_storage_returns_all() {
        let library = StoryLibrary::new(Arc::new(UnavailableStorage::new("no indexeddb")));

        assert_eq!(library.visible(vec![story("1")]).await.unwrap().len(), 1);
        assert!(library.add_favorite(&story("1")).await.unwrap_err().is_storage_unavailable());
    }
}
