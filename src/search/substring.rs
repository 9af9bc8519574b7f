use super::SearchResult;

pub struct GroceryItem {
    pub id: i64,
    pub name: &'static str,
    pub price_cents: i64,
}

const fn item(id: i64, name: &'static str, price_cents: i64) -> GroceryItem {
    GroceryItem {
        id,
        name,
        price_cents,
    }
}

/// Built-in demo catalog searched by the substring fallback.
pub const GROCERY_ITEMS: [GroceryItem; 25] = [
    item(1, "Whole Milk", 349),
    item(2, "2% Milk", 329),
    item(3, "Almond Milk", 449),
    item(4, "Oat Milk", 499),
    item(5, "Pasta - Penne", 199),
    item(6, "Pasta - Spaghetti", 189),
    item(7, "Pasta - Fusilli", 209),
    item(8, "Pasta Sauce - Marinara", 249),
    item(9, "Fresh Bread", 299),
    item(10, "Whole Wheat Bread", 329),
    item(11, "Bananas", 129),
    item(12, "Apples - Gala", 199),
    item(13, "Orange Juice", 399),
    item(14, "Greek Yogurt", 549),
    item(15, "Cheddar Cheese", 449),
    item(16, "Chicken Breast", 699),
    item(17, "Ground Beef", 599),
    item(18, "Salmon Fillet", 899),
    item(19, "Rice - Jasmine", 329),
    item(20, "Olive Oil", 799),
    item(21, "Eggs - Dozen", 279),
    item(22, "Butter", 429),
    item(23, "Cereal - Cheerios", 549),
    item(24, "Coffee Beans", 1299),
    item(25, "Green Tea", 399),
];

/// Legacy non-semantic search: case-insensitive substring match, catalog order.
#[derive(Clone, Copy)]
pub struct SubstringSearch {
    items: &'static [GroceryItem],
}

impl Default for SubstringSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl SubstringSearch {
    pub fn new() -> Self {
        Self {
            items: &GROCERY_ITEMS,
        }
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        let needle = query.to_lowercase();

        self.items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .take(limit)
            .map(|item| SearchResult {
                id: item.id,
                name: item.name.to_string(),
                price_cents: Some(item.price_cents),
                distance: None,
            })
            .collect()
    }
}
