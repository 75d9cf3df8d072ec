use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use sokoni_core::domain::product::{Product, ProductId};
use sokoni_core::domain::tenant::TenantId;
use sokoni_core::stores::{CatalogQuery, CatalogStore, StoreError};

use super::{parse_decimal, parse_json_list, parse_uuid, unavailable};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: ProductId(parse_uuid(row, "id")?),
        tenant_id: TenantId(parse_uuid(row, "tenant_id")?),
        name: row.get("name"),
        description: row.get("description"),
        category: row.get("category"),
        price: parse_decimal(row, "price")?,
        sizes: parse_json_list(row, "sizes")?,
        colors: parse_json_list(row, "colors")?,
        stock_quantity: row.get::<i64, _>("stock_quantity") as u32,
        tags: parse_json_list(row, "tags")?,
        image_urls: parse_json_list(row, "image_urls")?,
        active: row.get::<i64, _>("active") != 0,
    })
}

fn query_tokens(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| token.len() > 2)
        .map(str::to_ascii_lowercase)
        .filter(|token| !matches!(token.as_str(), "for" | "the" | "and" | "with" | "need" | "want" | "something"))
        .collect()
}

fn match_score(product: &Product, tokens: &[String]) -> usize {
    let haystack = format!(
        "{} {} {} {} {}",
        product.name,
        product.description.as_deref().unwrap_or_default(),
        product.category.as_deref().unwrap_or_default(),
        product.tags.join(" "),
        product.colors.join(" "),
    )
    .to_ascii_lowercase();

    tokens.iter().filter(|token| haystack.contains(token.as_str())).count()
}

#[async_trait]
impl CatalogStore for SqlCatalogRepository {
    async fn search(
        &self,
        tenant_id: &TenantId,
        query: &CatalogQuery,
    ) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM products \
             WHERE tenant_id = ?1 AND active = 1 AND stock_quantity > 0 \
             ORDER BY name LIMIT 200",
        )
        .bind(tenant_id.0.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut products = Vec::with_capacity(rows.len());
        for row in &rows {
            products.push(product_from_row(row)?);
        }

        if let Some(category) = &query.category {
            let category = category.to_ascii_lowercase();
            products.retain(|product| {
                product
                    .category
                    .as_deref()
                    .map(|value| value.eq_ignore_ascii_case(&category))
                    .unwrap_or(false)
            });
        }
        if let Some(min_price) = query.min_price {
            products.retain(|product| product.price >= min_price);
        }
        if let Some(max_price) = query.max_price {
            products.retain(|product| product.price <= max_price);
        }

        let tokens = query_tokens(&query.text);
        if !tokens.is_empty() {
            let mut scored: Vec<(usize, Product)> = products
                .into_iter()
                .map(|product| (match_score(&product, &tokens), product))
                .filter(|(score, _)| *score > 0)
                .collect();
            scored.sort_by(|left, right| {
                right.0.cmp(&left.0).then_with(|| left.1.name.cmp(&right.1.name))
            });
            products = scored.into_iter().map(|(_, product)| product).collect();
        }

        products.truncate(query.limit.max(1) as usize);
        Ok(products)
    }

    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ?1")
            .bind(id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn available_stock(&self, id: &ProductId, size: &str) -> Result<u32, StoreError> {
        let Some(product) = self.find_by_id(id).await? else {
            return Ok(0);
        };

        if !product.active {
            return Ok(0);
        }

        // Stock is tracked per product; a size that the product does not
        // carry is simply unavailable.
        let carries_size =
            product.sizes.iter().any(|candidate| candidate.eq_ignore_ascii_case(size));
        Ok(if carries_size { product.stock_quantity } else { 0 })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use sokoni_core::domain::product::ProductId;
    use sokoni_core::domain::tenant::TenantId;
    use sokoni_core::stores::{CatalogQuery, CatalogStore};

    use super::SqlCatalogRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool_with_tenant() -> (DbPool, TenantId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let tenant_id = TenantId(Uuid::new_v4());
        sqlx::query("INSERT INTO tenants (id, name, whatsapp_number) VALUES (?1, ?2, ?3)")
            .bind(tenant_id.0.to_string())
            .bind("Demo Boutique")
            .bind("whatsapp:+14155238886")
            .execute(&pool)
            .await
            .expect("insert tenant");
        (pool, tenant_id)
    }

    async fn insert_product(
        pool: &DbPool,
        tenant_id: &TenantId,
        name: &str,
        category: &str,
        price: Decimal,
        colors: &[&str],
        stock: i64,
    ) -> ProductId {
        let id = ProductId(Uuid::new_v4());
        sqlx::query(
            "INSERT INTO products \
                 (id, tenant_id, name, description, category, price, sizes, colors, stock_quantity, tags, image_urls, active) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '[]', '[]', 1)",
        )
        .bind(id.0.to_string())
        .bind(tenant_id.0.to_string())
        .bind(name)
        .bind(format!("A lovely {name}"))
        .bind(category)
        .bind(price.to_string())
        .bind(r#"["S","M","L"]"#)
        .bind(serde_json::to_string(colors).expect("colors"))
        .bind(stock)
        .execute(pool)
        .await
        .expect("insert product");
        id
    }

    #[tokio::test]
    async fn search_ranks_products_by_matching_terms() {
        let (pool, tenant_id) = pool_with_tenant().await;
        insert_product(&pool, &tenant_id, "Red Maxi Dress", "dresses", Decimal::new(350_000, 2), &["red"], 5).await;
        insert_product(&pool, &tenant_id, "Blue Denim Jacket", "jackets", Decimal::new(280_000, 2), &["blue"], 3).await;

        let repo = SqlCatalogRepository::new(pool);
        let hits = repo
            .search(&tenant_id, &CatalogQuery::text("red dress for a wedding"))
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Red Maxi Dress");
    }

    #[tokio::test]
    async fn out_of_stock_products_are_never_returned() {
        let (pool, tenant_id) = pool_with_tenant().await;
        insert_product(&pool, &tenant_id, "Red Maxi Dress", "dresses", Decimal::new(350_000, 2), &["red"], 0).await;

        let repo = SqlCatalogRepository::new(pool);
        let hits = repo.search(&tenant_id, &CatalogQuery::text("red dress")).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn price_window_filters_results() {
        let (pool, tenant_id) = pool_with_tenant().await;
        insert_product(&pool, &tenant_id, "Silk Gown", "dresses", Decimal::new(1_200_000, 2), &["gold"], 2).await;
        insert_product(&pool, &tenant_id, "Cotton Sundress", "dresses", Decimal::new(180_000, 2), &["yellow"], 6).await;

        let repo = SqlCatalogRepository::new(pool);
        let query = CatalogQuery {
            text: "dress".to_string(),
            category: None,
            min_price: None,
            max_price: Some(Decimal::new(500_000, 2)),
            limit: 5,
        };
        let hits = repo.search(&tenant_id, &query).await.expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Cotton Sundress");
    }

    #[tokio::test]
    async fn stock_check_requires_a_carried_size() {
        let (pool, tenant_id) = pool_with_tenant().await;
        let product_id = insert_product(&pool, &tenant_id, "Red Maxi Dress", "dresses", Decimal::new(350_000, 2), &["red"], 4).await;

        let repo = SqlCatalogRepository::new(pool);
        assert_eq!(repo.available_stock(&product_id, "M").await.expect("stock"), 4);
        assert_eq!(repo.available_stock(&product_id, "XXL").await.expect("stock"), 0);
    }
}
